//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! ```rust
//! use opentofu_workspace_controller::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Seams of the state machine, implemented by the cluster backends and by test fakes
pub use crate::controller::jobs::{Action, JobBackend, JobError, JobInfo, JobSnapshot, JobState, PodLog};
pub use crate::controller::reconciler::{EventKind, EventSink, ExternalClient, ExternalObservation};
pub use crate::controller::resolver::{ConnectorResolver, ResolveError, ResolvedConnector};

// Reconciler
pub use crate::controller::reconciler::{
    reconcile, run_lifecycle, BackoffState, Lifecycle, Reconciler, ReconcilerError, Step, WorkspaceExternal,
};

// Configuration
pub use crate::config::{ControllerConfig, JobConfig, ServerConfig, SharedControllerConfig, SharedServerConfig};
