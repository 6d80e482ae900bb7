//! # Initialization
//!
//! Controller start-up: rustls setup, OpenTelemetry, tracing, metrics, probe server,
//! Kubernetes client and the reconciler context.

use crate::config::{create_shared_config, SharedControllerConfig, SharedServerConfig};
use crate::controller::jobs::KubeJobBackend;
use crate::controller::reconciler::{KubeEventSink, Reconciler, WorkspaceExternal};
use crate::controller::resolver::KubeConnectorResolver;
use crate::controller::server::{start_server, ServerState};
use crate::crd::Workspace;
use crate::observability;
use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use kube::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    /// Workspaces in the watched scope
    pub workspaces: Api<Workspace>,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
    pub otel_tracer_provider: Option<observability::TracerProviderHandle>,
    pub controller_config: SharedControllerConfig,
    pub server_config: SharedServerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// # Errors
///
/// Fails when tracing export, metrics registration, the probe server or the
/// Kubernetes client cannot be set up.
pub async fn initialize() -> Result<InitializationResult> {
    // Must happen before anything opens a TLS connection
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    let (controller_config, server_config) = create_shared_config();

    let otel_tracer_provider =
        observability::init_otel().context("Failed to initialize OpenTelemetry")?;
    {
        let config = controller_config.read().await;
        init_tracing(&config.log_level, &config.log_format);
    }

    info!("Starting OpenTofu Workspace Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());
    let server_port = server_config.read().await.metrics_port;
    let server_handle = {
        let state = Arc::clone(&server_state);
        tokio::spawn(async move {
            if let Err(e) = start_server(server_port, state).await {
                error!("HTTP server error: {}", e);
            }
        })
    };
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let (workspaces, job_config) = {
        let config = controller_config.read().await;
        let workspaces: Api<Workspace> = match &config.watch_namespace {
            Some(namespace) => {
                info!("Watching Workspaces in namespace {}", namespace);
                Api::namespaced(client.clone(), namespace)
            }
            None => {
                info!("Watching Workspaces in all namespaces");
                Api::all(client.clone())
            }
        };
        (workspaces, config.jobs.clone())
    };

    let external = WorkspaceExternal::new(
        Arc::new(KubeJobBackend::new(client.clone(), job_config)),
        Arc::new(KubeConnectorResolver::new(client.clone())),
        Arc::new(KubeEventSink::new(client.clone())),
    );
    let reconciler = Arc::new(Reconciler::new(
        client.clone(),
        Arc::clone(&controller_config),
        Arc::new(external),
    ));

    log_startup_summary(&workspaces).await;
    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        workspaces,
        reconciler,
        server_state,
        otel_tracer_provider,
        controller_config,
        server_config,
    })
}

fn default_filter(log_level: &str) -> String {
    format!("opentofu_workspace_controller={}", log_level.to_lowercase())
}

/// Install the fmt subscriber; `RUST_LOG` overrides `LOG_LEVEL`
fn init_tracing(log_level: &str, log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(log_level).into());
    let result = if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    if let Err(e) = result {
        // datadog-opentelemetry may have installed its own subscriber
        warn!("Tracing subscriber init returned error: {}", e);
    }
}

/// Wait until the probe server has bound its port
async fn wait_for_server_ready(
    server_state: &ServerState,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: &SharedServerConfig,
) -> Result<()> {
    let (startup_timeout, poll_interval) = {
        let config = server_config.read().await;
        (config.startup_timeout(), config.poll_interval())
    };
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Check that the CRD is served and log the Workspaces found per namespace
///
/// The controller's initial list reconciles every one of them; this is for operators.
async fn log_startup_summary(workspaces: &Api<Workspace>) {
    let list = match workspaces.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(e) => {
            error!("Workspace CRD is not queryable; {:?}. Is the CRD installed?", e);
            error!("Installation: cargo run --bin crdgen | kubectl apply -f -");
            warn!("Continuing despite CRD queryability check failure - controller will retry");
            return;
        }
    };

    if list.items.is_empty() {
        info!("No existing Workspace resources found, watch will pick up new resources");
        return;
    }

    let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in &list.items {
        by_namespace
            .entry(item.metadata.namespace.clone().unwrap_or_default())
            .or_default()
            .push(item.metadata.name.clone().unwrap_or_default());
    }

    info!(
        "Found {} existing Workspaces in {} namespaces",
        list.items.len(),
        by_namespace.len()
    );
    for (namespace, mut names) in by_namespace {
        names.sort();
        info!("  {}: {}", namespace, summarize(&names));
    }
}

fn summarize(names: &[String]) -> String {
    if names.len() <= 3 {
        names.join(", ")
    } else {
        format!("{}, ... ({} total)", names[..3].join(", "), names.len())
    }
}
