//! # Reconcile Command
//!
//! Sets the reconcile-requested annotation. The annotation change wakes the
//! controller's watch; the controller removes it after a successful pass.

use anyhow::{Context, Result};
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use opentofu_workspace_controller::constants::RECONCILE_REQUESTED_ANNOTATION;
use opentofu_workspace_controller::crd::Workspace;
use serde_json::json;

/// Trigger reconciliation of a Workspace
pub async fn reconcile_command(client: Client, name: String, namespace: Option<String>) -> Result<()> {
    let ns = namespace.as_deref().unwrap_or("default");
    let api: Api<Workspace> = Api::namespaced(client, ns);

    println!("🔄 Triggering reconciliation for Workspace '{ns}/{name}'...");

    let workspace = api
        .get(&name)
        .await
        .with_context(|| format!("Failed to get Workspace '{ns}/{name}'"))?;
    if workspace.metadata.deletion_timestamp.is_some() {
        println!("   ⚠️  Workspace is being deleted; the controller is already finalizing it.");
    }

    let patch = json!({
        "metadata": {
            "annotations": {
                RECONCILE_REQUESTED_ANNOTATION: chrono::Utc::now().to_rfc3339()
            }
        }
    });
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .with_context(|| format!("Failed to annotate Workspace '{ns}/{name}'"))?;

    println!("   ✅ Reconciliation requested");
    println!("   Follow progress with: wsctl status {name} --namespace {ns}");
    Ok(())
}
