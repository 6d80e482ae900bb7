//! # Managed Reconciliation
//!
//! The per-Workspace control loop:
//!
//! 1. Ensure the finalizer (or release the object when it is gone already)
//! 2. Observe the external state through the [`ExternalClient`]
//! 3. Decide between finalize, delete, create, update and wait
//! 4. Persist the status, `Synced` reflecting the outcome
//! 5. Requeue
//!
//! Steps 2 and 3 live in [`run_lifecycle`], which needs nothing but an
//! [`ExternalClient`] and is exercised directly by the integration tests.

use super::external::ExternalClient;
use super::status::{
    add_finalizer, clear_manual_trigger_annotation, has_finalizer, is_manual_trigger, persist_status,
    remove_finalizer,
};
use super::transition::ExternalObservation;
use super::types::{Reconciler, ReconcilerError};
use crate::crd::{ManagementPolicies, Phase, Workspace, WorkspaceStatus};
use crate::observability::metrics;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// What the driver does after an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Release the finalizer; nothing is left to destroy
    Finalize,
    Delete,
    Create,
    Update,
    /// Converged, or waiting on a job, or the needed action is not allowed
    Wait,
}

/// Whether the driver should act on a pending deletion
///
/// A deletion timestamp cannot be cleared, so while destroy runs (`Deleting`) the
/// deletion is hidden from the driver. `Deleted` exposes it again.
#[must_use]
pub fn deletion_requested(workspace: &Workspace, status: &WorkspaceStatus) -> bool {
    workspace.metadata.deletion_timestamp.is_some() && status.phase() != Phase::Deleting
}

/// Map an observation to the next step
#[must_use]
pub fn next_step(deleting: bool, observation: ExternalObservation, policies: ManagementPolicies) -> Step {
    match observation {
        ExternalObservation::Pending => Step::Wait,
        ExternalObservation::Missing if deleting => Step::Finalize,
        _ if deleting => Step::Delete,
        ExternalObservation::Missing if policies.create => Step::Create,
        ExternalObservation::Outdated if policies.update => Step::Update,
        ExternalObservation::Missing | ExternalObservation::Outdated | ExternalObservation::UpToDate => {
            Step::Wait
        }
    }
}

/// Result of one pass through the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    pub observation: ExternalObservation,
    pub step: Step,
    /// The Workspace may be released
    pub release: bool,
}

/// Observe, then act on the observation
///
/// `status` is updated in place even when an error is returned.
///
/// # Errors
///
/// Propagates failures of the external client, including failed executions.
pub async fn run_lifecycle(
    external: &dyn ExternalClient,
    workspace: &Workspace,
    status: &mut WorkspaceStatus,
) -> Result<Lifecycle, ReconcilerError> {
    let observation = external.observe(workspace, status).await?;
    let deleting = deletion_requested(workspace, status);
    let step = match next_step(deleting, observation, workspace.spec.management_policies) {
        // A stored error releases through the delete entry point
        Step::Finalize if status.error.is_some() => Step::Delete,
        step => step,
    };
    debug!(
        "Workspace {}: observed {:?}, next step {:?}",
        workspace.name_any(),
        observation,
        step
    );

    let release = match step {
        Step::Finalize => true,
        Step::Delete => {
            external.delete(workspace, status).await?;
            // Skipped destroys finish immediately
            status.phase() == Phase::Deleted
        }
        Step::Create => {
            info!("🆕 Creating infrastructure for workspace {}", workspace.name_any());
            external.create(workspace, status).await?;
            false
        }
        Step::Update => {
            info!("♻️  Updating drifted workspace {}", workspace.name_any());
            external.update(workspace, status).await?;
            false
        }
        Step::Wait => false,
    };

    Ok(Lifecycle {
        observation,
        step,
        release,
    })
}

/// Controller entry point for one Workspace
///
/// # Errors
///
/// Returns the lifecycle error after the status has been persisted, so the error
/// policy can apply backoff.
pub async fn reconcile(workspace: Arc<Workspace>, ctx: Arc<Reconciler>) -> Result<Action, ReconcilerError> {
    let name = workspace.name_any();
    let namespace = workspace.namespace().unwrap_or_default();
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.reconcile",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        resource.generation = workspace.metadata.generation.unwrap_or(0)
    );
    reconcile_workspace(workspace, ctx).instrument(span).await
}

async fn reconcile_workspace(workspace: Arc<Workspace>, ctx: Arc<Reconciler>) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    metrics::increment_reconciliations();
    let name = workspace.name_any();
    let resource_key = format!("{}/{}", workspace.namespace().unwrap_or_default(), name);

    if workspace.metadata.deletion_timestamp.is_some() && !has_finalizer(&workspace) {
        debug!("Workspace {} is being deleted and holds no finalizer", name);
        return Ok(Action::await_change());
    }
    if workspace.metadata.deletion_timestamp.is_none() && !has_finalizer(&workspace) {
        add_finalizer(&ctx, &workspace).await?;
        debug!("Added finalizer to workspace {}", name);
        // The patch triggers a fresh reconciliation with the new resourceVersion
        return Ok(Action::await_change());
    }

    let (poll_interval, short_requeue) = {
        let config = ctx.config.read().await;
        (config.poll_interval(), config.short_requeue())
    };

    let mut status = workspace.status.clone().unwrap_or_default();
    let result = run_lifecycle(ctx.external.as_ref(), &workspace, &mut status).await;

    status.observed_generation = workspace.metadata.generation;
    match &result {
        Ok(_) => status.set_synced(None),
        Err(e) => status.set_synced(Some(&e.to_string())),
    }
    persist_status(&ctx, &workspace, &status).await?;
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

    let lifecycle = result?;

    if lifecycle.release {
        remove_finalizer(&ctx, &workspace).await?;
        info!("✅ Released workspace {}", name);
        ctx.forget_backoff(&resource_key);
        return Ok(Action::await_change());
    }

    if is_manual_trigger(&workspace) {
        if let Err(e) = clear_manual_trigger_annotation(&ctx, &workspace).await {
            warn!("Failed to clear manual trigger annotation: {}", e);
        }
    }
    ctx.reset_backoff(&resource_key);

    // Acting or waiting on a job: come back soon. Converged: regular polling.
    let (requeue, reason) = match (lifecycle.step, lifecycle.observation) {
        (Step::Wait, ExternalObservation::UpToDate) => (poll_interval, "poll"),
        (Step::Wait, ExternalObservation::Pending) => (short_requeue, "job-pending"),
        (Step::Wait, _) => (poll_interval, "action-not-allowed"),
        _ => (short_requeue, "job-launched"),
    };
    info!(
        "📅 Workspace {} in phase {}, next reconciliation in {}s ({})",
        name,
        status.phase(),
        requeue.as_secs(),
        reason
    );
    metrics::increment_requeues_total(reason);
    Ok(Action::requeue(requeue))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: ManagementPolicies = ManagementPolicies {
        create: true,
        update: true,
        delete: true,
    };
    const OBSERVE_ONLY: ManagementPolicies = ManagementPolicies {
        create: false,
        update: false,
        delete: false,
    };

    #[test]
    fn test_next_step_without_deletion() {
        assert_eq!(next_step(false, ExternalObservation::Missing, ALL), Step::Create);
        assert_eq!(next_step(false, ExternalObservation::Outdated, ALL), Step::Update);
        assert_eq!(next_step(false, ExternalObservation::UpToDate, ALL), Step::Wait);
        assert_eq!(next_step(false, ExternalObservation::Pending, ALL), Step::Wait);
    }

    #[test]
    fn test_next_step_honours_policies() {
        assert_eq!(next_step(false, ExternalObservation::Missing, OBSERVE_ONLY), Step::Wait);
        assert_eq!(next_step(false, ExternalObservation::Outdated, OBSERVE_ONLY), Step::Wait);
        // Deletion is decided by the delete entry point, not here
        assert_eq!(next_step(true, ExternalObservation::UpToDate, OBSERVE_ONLY), Step::Delete);
    }

    #[test]
    fn test_next_step_with_deletion() {
        assert_eq!(next_step(true, ExternalObservation::Missing, ALL), Step::Finalize);
        assert_eq!(next_step(true, ExternalObservation::UpToDate, ALL), Step::Delete);
        assert_eq!(next_step(true, ExternalObservation::Outdated, ALL), Step::Delete);
        assert_eq!(next_step(true, ExternalObservation::Pending, ALL), Step::Wait);
    }

    #[test]
    fn test_deletion_hidden_while_destroy_runs() {
        let workspace = |deletion: Option<&str>| -> Workspace {
            serde_json::from_value(serde_json::json!({
                "apiVersion": "opentofu.krateo.io/v1alpha1",
                "kind": "Workspace",
                "metadata": {"name": "network", "deletionTimestamp": deletion},
                "spec": {"workspace": {"module": "m"}}
            }))
            .unwrap()
        };
        let mut status = WorkspaceStatus::default();
        assert!(!deletion_requested(&workspace(None), &status));

        let workspace = workspace(Some("2026-01-01T00:00:00Z"));
        assert!(deletion_requested(&workspace, &status));

        status.set_phase(Phase::Deleting);
        assert!(!deletion_requested(&workspace, &status));

        status.set_phase(Phase::Deleted);
        assert!(deletion_requested(&workspace, &status));
    }
}
