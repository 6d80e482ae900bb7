//! # OpenTofu Workspace Controller
//!
//! A Kubernetes controller that provisions infrastructure described by `Workspace`
//! resources. Every lifecycle action (apply, plan, destroy) runs as a short-lived
//! Job executing the OpenTofu CLI; the controller only reads job outcomes and logs
//! and folds them into the Workspace status.
//!
//! ## Endpoints
//!
//! - `/metrics` - Prometheus metrics
//! - `/healthz` - liveness
//! - `/readyz` - readiness

use anyhow::Result;
use opentofu_workspace_controller::observability;
use opentofu_workspace_controller::runtime::{initialize, run_watch_loop};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    run_watch_loop(
        init.workspaces,
        init.reconciler,
        init.server_state,
        init.controller_config,
    )
    .await?;

    info!("Controller stopped");
    observability::shutdown_otel(init.otel_tracer_provider);
    Ok(())
}
