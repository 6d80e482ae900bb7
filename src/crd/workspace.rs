//! # Workspace
//!
//! The user-facing declaration of an OpenTofu module to provision.

use super::status::WorkspaceStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Workspace Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: opentofu.krateo.io/v1alpha1
/// kind: Workspace
/// metadata:
///   name: network
///   namespace: infra
/// spec:
///   connectorRef:
///     name: aws-connector
///     namespace: infra
///   workspace:
///     module: https://github.com/acme/tofu-network.git
///     entrypoint: envs/dev
///     vars:
///       - key: region
///         value: eu-west-1
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Workspace",
    group = "opentofu.krateo.io",
    version = "v1alpha1",
    namespaced,
    status = "WorkspaceStatus",
    shortname = "ws",
    printcolumn = r#"{"name":"READY", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"SYNCED", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Synced\")].status"}"#,
    printcolumn = r#"{"name":"PHASE", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#,
    printcolumn = r#"{"name":"AGE", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    /// TFConnector supplying credentials and environment to the execution jobs
    #[serde(default, alias = "tfConnectorRef")]
    pub connector_ref: Option<Reference>,
    /// Module to run
    pub workspace: WorkspaceParameters,
    /// What happens to provisioned infrastructure when the Workspace is deleted
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
    /// Which lifecycle actions the controller may take
    #[serde(default)]
    pub management_policies: ManagementPolicies,
}

/// Namespaced reference to another object
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceParameters {
    /// Remote module address (git URL) or inline HCL, depending on `source`
    pub module: String,
    #[serde(default)]
    pub source: ModuleSource,
    /// Subdirectory of the module to run in. `../` segments are ignored.
    #[serde(default)]
    pub entrypoint: Option<String>,
    /// Input variables, exposed to the CLI as `TF_VAR_<key>`
    #[serde(default)]
    pub vars: Vec<Var>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, Default, PartialEq, Eq)]
pub enum ModuleSource {
    /// Cloned with git into the working volume
    #[default]
    Remote,
    /// Written verbatim as `main.tf`
    Inline,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Var {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, Default, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Run `tofu destroy` before the Workspace is released
    #[default]
    Delete,
    /// Release the Workspace and leave the infrastructure in place
    Orphan,
}

/// Action-allow flags
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagementPolicies {
    #[serde(default = "default_true")]
    pub create: bool,
    #[serde(default = "default_true")]
    pub update: bool,
    #[serde(default = "default_true")]
    pub delete: bool,
}

impl Default for ManagementPolicies {
    fn default() -> Self {
        Self {
            create: true,
            update: true,
            delete: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl WorkspaceParameters {
    /// Entrypoint confined to the module directory, see [`confined_path`]
    #[must_use]
    pub fn sanitized_entrypoint(&self) -> Option<String> {
        self.entrypoint
            .as_deref()
            .map(confined_path)
            .filter(|e| !e.is_empty())
    }
}

/// Relative form of `path` with empty, `.` and `..` components dropped
#[must_use]
pub fn confined_path(path: &str) -> String {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != "." && *c != "..")
        .collect::<Vec<_>>()
        .join("/")
}

impl WorkspaceSpec {
    /// Whether deleting the Workspace should run `tofu destroy`
    #[must_use]
    pub fn destroy_allowed(&self) -> bool {
        self.deletion_policy == DeletionPolicy::Delete && self.management_policies.delete
    }
}
