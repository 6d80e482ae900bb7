//! # Status Command
//!
//! Detailed view of one Workspace, including the execution jobs it currently owns.

use anyhow::{Context, Result};
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, ListParams};
use kube::Client;
use opentofu_workspace_controller::constants::{ACTION_LABEL, WORKSPACE_LABEL};
use opentofu_workspace_controller::controller::jobs::job_state;
use opentofu_workspace_controller::crd::Workspace;

/// Show detailed status of a Workspace
pub async fn status_command(client: Client, name: String, namespace: Option<String>) -> Result<()> {
    let ns = namespace.as_deref().unwrap_or("default");

    println!("📊 Status for Workspace '{ns}/{name}'");
    println!();

    let api: Api<Workspace> = Api::namespaced(client.clone(), ns);
    let workspace = api
        .get(&name)
        .await
        .with_context(|| format!("Failed to get Workspace '{ns}/{name}'"))?;

    println!("Spec:");
    println!("  Module: {}", workspace.spec.workspace.module);
    println!("  Source: {:?}", workspace.spec.workspace.source);
    if let Some(entrypoint) = workspace.spec.workspace.sanitized_entrypoint() {
        println!("  Entrypoint: {entrypoint}");
    }
    if let Some(connector) = &workspace.spec.connector_ref {
        println!("  Connector: {}/{}", connector.namespace, connector.name);
    }
    println!("  Deletion Policy: {:?}", workspace.spec.deletion_policy);
    let policies = workspace.spec.management_policies;
    println!(
        "  Management Policies: create={} update={} delete={}",
        policies.create, policies.update, policies.delete
    );
    if workspace.metadata.deletion_timestamp.is_some() {
        println!("  ⚠️  Deletion requested");
    }

    let status = workspace.status.clone().unwrap_or_default();
    println!();
    println!("Status:");
    println!("  Phase: {}", status.phase());
    if let Some(generation) = status.observed_generation {
        println!(
            "  Observed Generation: {generation} (current: {})",
            workspace.metadata.generation.unwrap_or(0)
        );
    }
    if let Some(error) = &status.error {
        println!("  ❌ Error: {error}");
    }

    if !status.conditions.is_empty() {
        println!();
        println!("Conditions:");
        for condition in &status.conditions {
            println!(
                "  {}: {} ({})",
                condition.r#type,
                condition.status,
                condition.reason.as_deref().unwrap_or("-")
            );
            if let Some(message) = &condition.message {
                println!("    Message: {message}");
            }
            if let Some(time) = &condition.last_transition_time {
                println!("    Last Transition: {time}");
            }
        }
    }

    if let Some(outputs) = status.outputs.as_ref().filter(|o| !o.is_empty()) {
        println!();
        println!("Outputs:");
        for (key, value) in outputs {
            println!("  {key} = {value}");
        }
    }

    let jobs: Api<Job> = Api::namespaced(client, ns);
    let owned = jobs
        .list(&ListParams::default().labels(&format!("{WORKSPACE_LABEL}={name}")))
        .await
        .with_context(|| format!("Failed to list jobs of Workspace '{ns}/{name}'"))?;

    println!();
    if owned.items.is_empty() {
        println!("Jobs: none");
    } else {
        println!("Jobs:");
        for job in &owned.items {
            let action = job
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(ACTION_LABEL))
                .map_or("-", String::as_str);
            println!(
                "  {} ({}): {}",
                job.metadata.name.as_deref().unwrap_or("<unknown>"),
                action,
                job_state(job).as_str()
            );
        }
    }

    Ok(())
}
