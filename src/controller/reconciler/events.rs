//! # Events
//!
//! Kubernetes events recorded against a Workspace as its lifecycle progresses.

use crate::constants::CONTROLLER_NAME;
use crate::crd::Workspace;
use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An apply job was launched
    CreatedExternalResource,
    /// A destroy job finished successfully
    DeletedExternalResource,
    PlanStarted,
    DriftDetected,
    /// A job failed; the note carries the classified error
    ExecutionFailed,
    /// Deletion released the Workspace without running destroy
    DestroySkipped,
}

impl EventKind {
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            EventKind::CreatedExternalResource => "CreatedExternalResource",
            EventKind::DeletedExternalResource => "DeletedExternalResource",
            EventKind::PlanStarted => "PlanStarted",
            EventKind::DriftDetected => "DriftDetected",
            EventKind::ExecutionFailed => "ExecutionFailed",
            EventKind::DestroySkipped => "DestroySkipped",
        }
    }

    #[must_use]
    pub fn is_warning(self) -> bool {
        matches!(self, EventKind::ExecutionFailed | EventKind::DestroySkipped)
    }

    fn action(self) -> &'static str {
        match self {
            EventKind::CreatedExternalResource => "Apply",
            EventKind::DeletedExternalResource | EventKind::DestroySkipped => "Destroy",
            EventKind::PlanStarted | EventKind::DriftDetected => "Plan",
            EventKind::ExecutionFailed => "Execute",
        }
    }
}

/// Destination of lifecycle events
///
/// Publishing is best effort: a failure is logged and never fails the reconciliation.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, workspace: &Workspace, kind: EventKind, note: &str);
}

/// [`EventSink`] writing `events.k8s.io` events through the kube-runtime recorder
#[derive(Clone)]
pub struct KubeEventSink {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventSink").finish_non_exhaustive()
    }
}

impl KubeEventSink {
    #[must_use]
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, workspace: &Workspace, kind: EventKind, note: &str) {
        let event = Event {
            type_: if kind.is_warning() {
                EventType::Warning
            } else {
                EventType::Normal
            },
            reason: kind.reason().to_string(),
            note: Some(note.to_string()),
            action: kind.action().to_string(),
            secondary: None,
        };
        if let Err(e) = self
            .recorder
            .publish(&event, &workspace.object_ref(&()))
            .await
        {
            warn!("Failed to publish {} event: {}", kind.reason(), e);
        }
    }
}
