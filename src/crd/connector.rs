//! # TFConnector
//!
//! Credentials and environment injected into execution jobs. Read-only to the controller.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// TFConnector Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: opentofu.krateo.io/v1alpha1
/// kind: TFConnector
/// metadata:
///   name: aws-connector
///   namespace: infra
/// spec:
///   envVars:
///     - configMapRef:
///         name: tofu-settings
///   providersCredentials:
///     envVars:
///       - secretRef:
///           name: aws-credentials
///   gitCredentials:
///     secretRef:
///       name: git-token   # must define GIT_CREDENTIALS
///   backendCredentials:
///     - hostname: app.terraform.io
///       secretRef:
///         name: tfc-token
///         key: token
/// ```
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "TFConnector",
    group = "opentofu.krateo.io",
    version = "v1alpha1",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TFConnectorSpec {
    /// General environment for the main container
    #[serde(default)]
    pub env_vars: Vec<EnvSource>,
    /// Provider credentials
    #[serde(default)]
    pub providers_credentials: ProvidersCredentials,
    /// Source defining `GIT_CREDENTIALS` for cloning private modules
    #[serde(default)]
    pub git_credentials: Option<EnvSource>,
    /// Tokens for remote state backends and private registries
    #[serde(default)]
    pub backend_credentials: Vec<BackendCredential>,
    /// Extra HCL written next to the module as `connector-config.tf`
    #[serde(default)]
    pub configuration: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersCredentials {
    #[serde(default)]
    pub env_vars: Vec<EnvSource>,
    /// Secret keys mounted as files in the module directory
    #[serde(default)]
    pub files: Vec<CredentialFile>,
}

/// Every key of a Secret or ConfigMap exposed as environment variables
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvSource {
    #[serde(default)]
    pub secret_ref: Option<NameRef>,
    #[serde(default)]
    pub config_map_ref: Option<NameRef>,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct NameRef {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialFile {
    /// File name relative to the module directory
    pub filename: String,
    pub secret_ref: SecretKeyRef,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackendCredential {
    /// Host the token is valid for, e.g. `app.terraform.io`
    pub hostname: String,
    pub secret_ref: SecretKeyRef,
}

impl BackendCredential {
    /// Variable the CLI reads the token from, e.g. `TF_TOKEN_app_terraform_io`
    #[must_use]
    pub fn env_name(&self) -> String {
        format!("TF_TOKEN_{}", self.hostname.replace(['.', '-'], "_"))
    }
}
