//! # Reconciler
//!
//! Reconciliation of `Workspace` resources.
//!
//! The reconciler:
//! - Watches `Workspace` resources and the Jobs they own
//! - Rediscovers in-flight execution jobs by name on every pass
//! - Moves each Workspace through its lifecycle phases
//! - Records failures, outputs and conditions in the status
//!
//! ## Module Structure
//!
//! - `transition.rs` - pure transition table
//! - `external.rs` - [`ExternalClient`] and the job-backed [`WorkspaceExternal`]
//! - `managed.rs` - finalizer handling, the observe/act loop and requeueing
//! - `status.rs` - status writes with conflict retry, finalizer and annotation patches
//! - `events.rs` - Kubernetes events
//! - `types.rs` - errors, backoff state and the shared context

pub mod events;
pub mod external;
pub mod managed;
pub mod status;
pub mod transition;
pub mod types;

pub use events::{EventKind, EventSink, KubeEventSink};
pub use external::{ExternalClient, WorkspaceExternal};
pub use managed::{deletion_requested, next_step, reconcile, run_lifecycle, Lifecycle, Step};
pub use transition::{ExternalObservation, JobProbe, JobProbes};
pub use types::{BackoffState, Reconciler, ReconcilerError};
