//! # OpenTelemetry Support
//!
//! Datadog APM export through `datadog-opentelemetry`, enabled only when
//! `DD_API_KEY` is present in the controller's environment.
//!
//! Optional variables: `DD_SERVICE`, `DD_VERSION`, `DD_ENV`, `DD_SITE`, `DD_TRACE_AGENT_URL`.

use anyhow::Result;
use std::time::Duration;
use tracing::{info, warn};

/// Tracer provider handle for graceful shutdown
#[derive(Debug)]
pub enum TracerProviderHandle {
    Datadog(opentelemetry_sdk::trace::SdkTracerProvider),
}

/// Initialize tracing export when Datadog is configured
///
/// Returns `Ok(None)` when `DD_API_KEY` is unset.
///
/// # Errors
///
/// Returns an error if initialization fails.
pub fn init_otel() -> Result<Option<TracerProviderHandle>> {
    if std::env::var("DD_API_KEY").is_err() {
        if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
            warn!("OTEL_EXPORTER_OTLP_ENDPOINT is set but only Datadog export is supported");
        }
        info!("No OpenTelemetry configuration provided, skipping Otel initialization");
        return Ok(None);
    }

    // Defaults for anything the deployment did not set; read by datadog-opentelemetry
    set_default("DD_SERVICE", crate::constants::CONTROLLER_NAME);
    set_default(
        "DD_VERSION",
        &format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("BUILD_GIT_HASH")),
    );
    set_default("DD_SITE", "datadoghq.com");
    set_default("DD_TRACE_AGENT_URL", "http://localhost:8126");

    info!(
        "Initializing Datadog OpenTelemetry tracing: service={}, version={}, env={:?}",
        std::env::var("DD_SERVICE").unwrap_or_default(),
        std::env::var("DD_VERSION").unwrap_or_default(),
        std::env::var("DD_ENV").ok(),
    );

    let tracer_provider = datadog_opentelemetry::tracing().init();

    info!(
        "✅ Datadog OpenTelemetry tracing initialized, sending to {}",
        std::env::var("DD_TRACE_AGENT_URL").unwrap_or_default()
    );
    Ok(Some(TracerProviderHandle::Datadog(tracer_provider)))
}

fn set_default(key: &str, value: &str) {
    if std::env::var(key).is_err() {
        std::env::set_var(key, value);
    }
}

/// Flush pending spans and shut the tracer provider down
pub fn shutdown_otel(tracer_provider: Option<TracerProviderHandle>) {
    match tracer_provider {
        Some(TracerProviderHandle::Datadog(provider)) => {
            info!("Shutting down Datadog tracer provider...");
            if let Err(e) = provider.shutdown_with_timeout(Duration::from_secs(5)) {
                warn!("Error shutting down Datadog tracer provider: {}", e);
            } else {
                info!("✅ Datadog tracer provider shut down successfully");
            }
        }
        None => {}
    }
}
