//! # WSCTL CLI
//!
//! Command-line interface for the OpenTofu Workspace Controller.
//!
//! ## Usage
//!
//! ```bash
//! # List Workspaces in all namespaces
//! wsctl list
//!
//! # Show status, outputs and outstanding jobs of a Workspace
//! wsctl status network --namespace infra
//!
//! # Ask the controller to reconcile a Workspace now
//! wsctl reconcile network --namespace infra
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kube::Client;

mod list;
mod reconcile;
mod status;

/// OpenTofu Workspace Controller CLI
#[derive(Parser)]
#[command(name = "wsctl")]
#[command(
    about = "OpenTofu Workspace Controller CLI",
    long_about = None,
    after_help = "\
Examples:
  wsctl list
  wsctl list --namespace infra
  wsctl status network --namespace infra
  wsctl reconcile network --namespace infra
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes namespace (list defaults to all namespaces, other commands to 'default')
    #[arg(short, long, global = true)]
    namespace: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List Workspaces with their phase, sync state and last error
    List,
    /// Show conditions, error, outputs and outstanding jobs of a Workspace
    Status {
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// Request an immediate reconciliation of a Workspace
    Reconcile {
        #[arg(value_name = "NAME")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wsctl=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")?;

    match cli.command {
        Commands::List => list::list_command(client, cli.namespace).await,
        Commands::Status { name } => status::status_command(client, name, cli.namespace).await,
        Commands::Reconcile { name } => {
            reconcile::reconcile_command(client, name, cli.namespace).await
        }
    }
}
