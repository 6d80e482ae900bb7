//! # Types
//!
//! Core types for the reconciler.

use super::external::ExternalClient;
use crate::config::SharedControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::jobs::JobError;
use crate::controller::resolver::ResolveError;
use kube::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("connector resolution failed: {0}")]
    Resolve(#[from] ResolveError),
    #[error("job operation failed: {0}")]
    Job(#[from] JobError),
    /// A lifecycle job failed; carries the classified error
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("status update conflicted {attempts} times")]
    StatusConflict { attempts: u32 },
    #[error("finalizer error: {0}")]
    Finalizer(String),
    #[error("workspace has no {0}")]
    MissingMetadata(&'static str),
}

/// Backoff state for a specific resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared reconciliation context
#[derive(Clone)]
pub struct Reconciler {
    pub client: Client,
    pub config: SharedControllerConfig,
    pub external: Arc<dyn ExternalClient>,
    // Keyed by namespace/name; lives here so error_policy can grow it without blocking reconciles
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(client: Client, config: SharedControllerConfig, external: Arc<dyn ExternalClient>) -> Self {
        Self {
            client,
            config,
            external,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Forget the error streak of a resource after it reconciled cleanly
    pub fn reset_backoff(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }

    /// Drop the backoff entry of a released resource
    pub fn forget_backoff(&self, resource_key: &str) {
        forget_backoff_state(&self.backoff_states, resource_key);
    }
}

fn forget_backoff_state(states: &Mutex<HashMap<String, BackoffState>>, resource_key: &str) {
    if let Ok(mut states) = states.lock() {
        states.remove(resource_key);
    }
}
