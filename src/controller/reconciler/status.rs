//! # Status Persistence
//!
//! Writes the working status back to the Workspace and maintains its finalizer
//! and trigger annotation.
//!
//! Status writes are JSON merge patches carrying `metadata.resourceVersion`, so a
//! write based on a stale read is rejected with 409. The object is then re-read and
//! the write retried with the fresh version, a bounded number of times.

use super::types::{Reconciler, ReconcilerError};
use crate::constants::{RECONCILE_REQUESTED_ANNOTATION, STATUS_CONFLICT_RETRY_ATTEMPTS, WORKSPACE_FINALIZER};
use crate::crd::{Workspace, WorkspaceStatus};
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use serde_json::{json, Value};
use tracing::{debug, warn};

fn workspace_api(reconciler: &Reconciler, workspace: &Workspace) -> Result<Api<Workspace>, ReconcilerError> {
    let namespace = workspace
        .namespace()
        .ok_or(ReconcilerError::MissingMetadata("namespace"))?;
    Ok(Api::namespaced(reconciler.client.clone(), &namespace))
}

/// Merge patch body for `status`
///
/// Cleared fields are sent as explicit nulls; merge patches treat a missing key as
/// "leave unchanged".
#[must_use]
pub fn status_patch(status: &WorkspaceStatus, resource_version: Option<&str>) -> Value {
    let mut body = serde_json::to_value(status).unwrap_or_else(|_| json!({}));
    if status.error.is_none() {
        body["error"] = Value::Null;
    }
    json!({
        "metadata": { "resourceVersion": resource_version },
        "status": body,
    })
}

/// Persist `status` unless it is identical to what the object already carries
///
/// # Errors
///
/// Fails on API errors and when conflicts persist past the retry budget.
pub async fn persist_status(
    reconciler: &Reconciler,
    workspace: &Workspace,
    status: &WorkspaceStatus,
) -> Result<(), ReconcilerError> {
    if workspace.status.as_ref() == Some(status) {
        debug!("Skipping status update for {} - unchanged", workspace.name_any());
        return Ok(());
    }

    let api = workspace_api(reconciler, workspace)?;
    let name = workspace.name_any();
    let mut resource_version = workspace.resource_version();

    for attempt in 1..=STATUS_CONFLICT_RETRY_ATTEMPTS {
        let patch = status_patch(status, resource_version.as_deref());
        match api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => return Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                warn!(
                    "Status update for {} conflicted (attempt {}/{}), re-reading",
                    name, attempt, STATUS_CONFLICT_RETRY_ATTEMPTS
                );
                resource_version = api.get(&name).await?.resource_version();
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!("Workspace {} disappeared before its status was written", name);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(ReconcilerError::StatusConflict {
        attempts: STATUS_CONFLICT_RETRY_ATTEMPTS,
    })
}

#[must_use]
pub fn has_finalizer(workspace: &Workspace) -> bool {
    workspace.finalizers().iter().any(|f| f == WORKSPACE_FINALIZER)
}

async fn patch_finalizers(
    reconciler: &Reconciler,
    workspace: &Workspace,
    finalizers: Vec<String>,
) -> Result<(), ReconcilerError> {
    let api = workspace_api(reconciler, workspace)?;
    let patch = json!({
        "metadata": {
            "resourceVersion": workspace.resource_version(),
            "finalizers": finalizers,
        }
    });
    api.patch(&workspace.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map(|_| ())
        .map_err(|e| ReconcilerError::Finalizer(e.to_string()))
}

/// Add the finalizer guarding destroy
///
/// # Errors
///
/// Fails when the patch is rejected; a conflict is retried by the next reconciliation.
pub async fn add_finalizer(reconciler: &Reconciler, workspace: &Workspace) -> Result<(), ReconcilerError> {
    let mut finalizers = workspace.finalizers().to_vec();
    finalizers.push(WORKSPACE_FINALIZER.to_string());
    patch_finalizers(reconciler, workspace, finalizers).await
}

/// Release the Workspace for deletion
///
/// # Errors
///
/// Fails when the patch is rejected.
pub async fn remove_finalizer(reconciler: &Reconciler, workspace: &Workspace) -> Result<(), ReconcilerError> {
    let finalizers = workspace
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != WORKSPACE_FINALIZER)
        .cloned()
        .collect();
    patch_finalizers(reconciler, workspace, finalizers).await
}

#[must_use]
pub fn is_manual_trigger(workspace: &Workspace) -> bool {
    workspace
        .annotations()
        .contains_key(RECONCILE_REQUESTED_ANNOTATION)
}

/// Clear the `wsctl reconcile` annotation after a successful run
///
/// # Errors
///
/// Fails when the patch is rejected.
pub async fn clear_manual_trigger_annotation(
    reconciler: &Reconciler,
    workspace: &Workspace,
) -> Result<(), ReconcilerError> {
    let api = workspace_api(reconciler, workspace)?;
    let patch = json!({
        "metadata": { "annotations": { RECONCILE_REQUESTED_ANNOTATION: Value::Null } }
    });
    api.patch(&workspace.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    debug!("Cleared manual trigger annotation for {}", workspace.name_any());
    Ok(())
}
