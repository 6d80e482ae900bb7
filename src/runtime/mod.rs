//! # Runtime
//!
//! Process-level wiring of the controller:
//!
//! - `initialization.rs` - crypto provider, tracing, metrics, probe server, client and context
//! - `watch_loop.rs` - the kube-runtime `Controller` over Workspaces and their Jobs
//! - `error_policy.rs` - per-resource backoff and watch stream error handling

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use initialization::{initialize, InitializationResult};
pub use watch_loop::run_watch_loop;
