//! # Error Policy
//!
//! Reconciliation errors back off per resource with a Fibonacci sequence, so one
//! broken Workspace never slows down the others. Watch stream errors are
//! classified and delayed before the stream carries on.

use crate::constants::{DEFAULT_BACKOFF_MAX_SECS, DEFAULT_BACKOFF_MIN_SECS};
use crate::controller::reconciler::{BackoffState, Reconciler, ReconcilerError};
use crate::crd::Workspace;
use crate::observability::metrics;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Requeue a failed reconciliation after the resource's next backoff delay
pub fn handle_reconciliation_error(
    workspace: Arc<Workspace>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = workspace.name_any();
    let namespace = workspace.namespace().unwrap_or_default();
    error!(
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        "Reconciliation error for {}: {}",
        name,
        error
    );
    metrics::increment_reconciliation_errors();

    // The config lock is async; fall back to the defaults while it is being written
    let (min_secs, max_secs) = ctx.config.try_read().map_or(
        (DEFAULT_BACKOFF_MIN_SECS, DEFAULT_BACKOFF_MAX_SECS),
        |c| (c.backoff_min_secs, c.backoff_max_secs),
    );

    let resource_key = format!("{namespace}/{name}");
    let (delay_secs, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states
                .entry(resource_key)
                .or_insert_with(|| BackoffState::new(min_secs, max_secs));
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using default backoff", e);
            (min_secs, 0)
        }
    };

    info!(
        "🔄 Retrying {} with Fibonacci backoff: {}s (error count: {})",
        name, delay_secs, error_count
    );
    metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(delay_secs))
}

/// Kind of failure reported by the watch stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// Credentials or RBAC were revoked
    Unauthorized,
    /// Resource version too old; the watcher relists
    Expired,
    /// API server overloaded or initializing storage
    Throttled,
    /// CRD missing or object deleted mid-watch
    NotFound,
    Other,
}

/// Classify a watch error from its rendered form
#[must_use]
pub fn classify_watch_error(error: &str) -> WatchErrorKind {
    // 404 first: a plain-text 404 body shows up wrapped in a WatchFailed error
    let not_found =
        error.contains("ObjectNotFound") || error.contains("404") || error.contains("not found");
    if not_found {
        return WatchErrorKind::NotFound;
    }
    if error.contains("401") || error.contains("Unauthorized") {
        return WatchErrorKind::Unauthorized;
    }
    if error.contains("410") || error.contains("too old resource version") || error.contains("Gone")
    {
        return WatchErrorKind::Expired;
    }
    if error.contains("429")
        || error.contains("TooManyRequests")
        || error.contains("storage is (re)initializing")
    {
        return WatchErrorKind::Throttled;
    }
    WatchErrorKind::Other
}

/// Log and delay after a watch stream error
///
/// `backoff_ms` holds the current throttling delay; it doubles up to `max_backoff_ms`
/// and is reset by the caller after the next successful event.
pub async fn handle_watch_stream_error(
    error: &str,
    backoff_ms: &AtomicU64,
    max_backoff_ms: u64,
    restart_delay: Duration,
) -> WatchErrorKind {
    let kind = classify_watch_error(error);
    match kind {
        WatchErrorKind::Unauthorized => {
            error!("❌ Watch authentication failed (401) - RBAC may have been revoked or the token expired");
            error!("   kubectl auth can-i watch workspaces.opentofu.krateo.io --as=system:serviceaccount:<namespace>:opentofu-workspace-controller");
            warn!("⏳ Waiting {}s before continuing the watch", restart_delay.as_secs());
            tokio::time::sleep(restart_delay).await;
        }
        WatchErrorKind::Expired => {
            warn!("Watch resource version expired (410), the watcher will relist");
        }
        WatchErrorKind::Throttled => {
            let current = backoff_ms.load(Ordering::Relaxed);
            warn!("API server throttling (429), backing off for {}ms", current);
            tokio::time::sleep(Duration::from_millis(current)).await;
            backoff_ms.store(current.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
        }
        WatchErrorKind::NotFound => {
            warn!("Watched resource not found (404); is the CRD installed? Error: {}", error);
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {}", error);
            tokio::time::sleep(restart_delay).await;
        }
    }
    kind
}
