//! OpenTofu Workspace Controller Library
//!
//! Reconciles `Workspace` resources into OpenTofu execution jobs.
//!
//! ## Quick Start
//!
//! ```rust
//! use opentofu_workspace_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
