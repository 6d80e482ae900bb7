//! # Controller
//!
//! Core controller modules for the OpenTofu Workspace Controller.
//!
//! - `backoff`: Fibonacci backoff for failed reconciliations
//! - `classifier`: Error and plan classification of OpenTofu output
//! - `jobs`: Execution jobs and their supporting objects
//! - `reconciler`: Lifecycle state machine and the managed driver
//! - `resolver`: TFConnector resolution
//! - `server`: HTTP server for metrics and health checks
//!
//! The `crdgen` binary lives alongside these modules but is built as its own target.

pub mod backoff;
pub mod classifier;
pub mod jobs;
pub mod reconciler;
pub mod resolver;
pub mod server;
