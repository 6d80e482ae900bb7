//! # Watch Loop
//!
//! Runs the kube-runtime `Controller` over Workspaces. Jobs labelled with their
//! owning Workspace are watched too, so a finished job triggers a reconciliation
//! of its owner without waiting for the poll interval.

use crate::config::SharedControllerConfig;
use crate::constants::WORKSPACE_LABEL;
use crate::controller::reconciler::{reconcile, Reconciler, ReconcilerError};
use crate::controller::server::ServerState;
use crate::crd::Workspace;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::api::Api;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Run the controller until a shutdown signal arrives
///
/// The controller is rebuilt whenever its stream ends for any other reason.
///
/// # Errors
///
/// Currently always returns `Ok` once shutdown completes.
pub async fn run_watch_loop(
    workspaces: Api<Workspace>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    controller_config: SharedControllerConfig,
) -> Result<(), anyhow::Error> {
    let (backoff_start_ms, concurrency, watch_namespace) = {
        let config = controller_config.read().await;
        (
            config.backoff_start_ms,
            u16::try_from(config.max_concurrent_reconciliations).unwrap_or(u16::MAX),
            config.watch_namespace.clone(),
        )
    };
    let backoff_ms = Arc::new(AtomicU64::new(backoff_start_ms));

    let shutdown_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, initiating graceful shutdown...");
            shutdown_state.set_ready(false);
            info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
        }
    });

    loop {
        if !server_state.ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let jobs: Api<Job> = match &watch_namespace {
            Some(namespace) => Api::namespaced(reconciler.client.clone(), namespace),
            None => Api::all(reconciler.client.clone()),
        };
        let watch_span = tracing::span!(tracing::Level::INFO, "controller.watch", operation = "watch_loop");

        info!("Starting controller watch loop...");
        let backoff = Arc::clone(&backoff_ms);
        let config = Arc::clone(&controller_config);
        Controller::new(workspaces.clone(), watcher::Config::default().any_semantic())
            .owns(jobs, watcher::Config::default().labels(WORKSPACE_LABEL))
            .with_config(controller::Config::default().concurrency(concurrency))
            .shutdown_on_signal()
            .run(reconcile_workspace, handle_reconciliation_error, Arc::clone(&reconciler))
            .for_each(move |result| {
                let backoff = Arc::clone(&backoff);
                let config = Arc::clone(&config);
                async move {
                    match result {
                        Ok((obj_ref, action)) => {
                            backoff.store(config.read().await.backoff_start_ms, Ordering::Relaxed);
                            debug!(resource = %obj_ref, action = ?action, "watch.event.reconciled");
                        }
                        // Already logged and backed off by the error policy
                        Err(controller::Error::ReconcilerFailed(e, obj_ref)) => {
                            debug!(resource = %obj_ref, error = %e, "watch.event.reconciliation_failed");
                        }
                        Err(e) => {
                            let (max_backoff_ms, restart_delay) = {
                                let config = config.read().await;
                                (config.backoff_max_ms, config.watch_restart_delay_duration())
                            };
                            handle_watch_stream_error(&format!("{e:?}"), &backoff, max_backoff_ms, restart_delay)
                                .await;
                        }
                    }
                }
            })
            .instrument(watch_span)
            .await;

        if !server_state.ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay = controller_config.read().await.watch_restart_delay_after_end_duration();
        warn!("Controller watch stream ended, restarting in {} seconds...", delay.as_secs());
        tokio::time::sleep(delay).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}

async fn reconcile_workspace(workspace: Arc<Workspace>, ctx: Arc<Reconciler>) -> Result<Action, ReconcilerError> {
    debug!(
        resource.name = workspace.metadata.name.as_deref().unwrap_or("unknown"),
        resource.generation = workspace.metadata.generation.unwrap_or(0),
        resource.observed_generation = workspace
            .status
            .as_ref()
            .and_then(|s| s.observed_generation)
            .unwrap_or(0),
        "watch.event.received"
    );
    reconcile(workspace, ctx).await
}
