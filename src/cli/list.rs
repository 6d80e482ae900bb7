//! # List Command

use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use kube::Client;
use opentofu_workspace_controller::crd::{Workspace, SYNCED};

/// List Workspaces in one namespace or in all of them
pub async fn list_command(client: Client, namespace: Option<String>) -> Result<()> {
    let api: Api<Workspace> = if let Some(ns) = &namespace {
        println!("Listing Workspaces in namespace '{ns}'...");
        Api::namespaced(client, ns)
    } else {
        println!("Listing Workspaces in all namespaces...");
        Api::all(client)
    };

    let workspaces = api
        .list(&ListParams::default())
        .await
        .context("Failed to list Workspace resources")?;

    if workspaces.items.is_empty() {
        println!("No Workspace resources found.");
        return Ok(());
    }

    println!(
        "\n{:<30} {:<20} {:<12} {:<8} {:<40}",
        "NAME", "NAMESPACE", "PHASE", "SYNCED", "ERROR"
    );
    println!("{}", "-".repeat(112));

    for workspace in workspaces.items {
        let name = workspace.metadata.name.as_deref().unwrap_or("<unknown>");
        let ns = workspace.metadata.namespace.as_deref().unwrap_or("<unknown>");
        let status = workspace.status.unwrap_or_default();
        let phase = status.phase();
        let synced = status
            .condition(SYNCED)
            .map_or("Unknown", |c| c.status.as_str());
        let error = status.error.as_deref().map_or_else(|| "-".to_string(), truncate);

        println!("{name:<30} {ns:<20} {phase:<12} {synced:<8} {error:<40}");
    }

    Ok(())
}

fn truncate(text: &str) -> String {
    const MAX: usize = 40;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let head: String = text.chars().take(MAX - 3).collect();
        format!("{head}...")
    }
}
