//! # Observability
//!
//! - `metrics`: Prometheus metrics collection
//! - `otel`: OpenTelemetry tracing integration

pub mod metrics;
pub mod otel;

pub use otel::{init_otel, shutdown_otel, TracerProviderHandle};
