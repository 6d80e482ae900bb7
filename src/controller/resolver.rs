//! # Connector Resolver
//!
//! Looks up the TFConnector a Workspace points at and turns it into the
//! environment handed to execution jobs. Nothing resolved here is written back
//! to the Workspace or into the controller's own process environment.

use crate::crd::{
    BackendCredential, CredentialFile, EnvSource, Reference, TFConnector, TFConnectorSpec,
};
use async_trait::async_trait;
use kube::{Api, Client};
use thiserror::Error;
use tracing::debug;

/// Connector data ready to be templated into a job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedConnector {
    /// General env sources for the main container
    pub env_vars: Vec<EnvSource>,
    /// Provider credential env sources for the main container
    pub provider_env_vars: Vec<EnvSource>,
    /// Secret keys mounted into the module directory
    pub credential_files: Vec<CredentialFile>,
    /// Env source for the init container only
    pub git_credentials: Option<EnvSource>,
    pub backend_credentials: Vec<BackendCredential>,
    /// Extra HCL written next to the module
    pub configuration: Option<String>,
}

impl From<TFConnectorSpec> for ResolvedConnector {
    fn from(spec: TFConnectorSpec) -> Self {
        Self {
            env_vars: spec.env_vars,
            provider_env_vars: spec.providers_credentials.env_vars,
            credential_files: spec.providers_credentials.files,
            git_credentials: spec.git_credentials,
            backend_credentials: spec.backend_credentials,
            configuration: spec.configuration.filter(|c| !c.trim().is_empty()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("workspace has no connectorRef")]
    MissingReference,
    #[error("connector {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },
    #[error("cannot read connector {namespace}/{name}: {source}")]
    Api {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },
}

/// Source of connector data
#[async_trait]
pub trait ConnectorResolver: Send + Sync {
    /// Resolve `reference`, failing when it is missing or unreadable
    async fn resolve(
        &self,
        reference: Option<&Reference>,
    ) -> Result<ResolvedConnector, ResolveError>;
}

/// Resolver reading TFConnector objects from the cluster
#[derive(Clone)]
pub struct KubeConnectorResolver {
    client: Client,
}

impl std::fmt::Debug for KubeConnectorResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeConnectorResolver").finish_non_exhaustive()
    }
}

impl KubeConnectorResolver {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConnectorResolver for KubeConnectorResolver {
    async fn resolve(
        &self,
        reference: Option<&Reference>,
    ) -> Result<ResolvedConnector, ResolveError> {
        let reference = reference.ok_or(ResolveError::MissingReference)?;
        let api: Api<TFConnector> = Api::namespaced(self.client.clone(), &reference.namespace);

        let connector = api
            .get_opt(&reference.name)
            .await
            .map_err(|source| ResolveError::Api {
                namespace: reference.namespace.clone(),
                name: reference.name.clone(),
                source,
            })?
            .ok_or_else(|| ResolveError::NotFound {
                namespace: reference.namespace.clone(),
                name: reference.name.clone(),
            })?;

        debug!(
            connector.name = reference.name.as_str(),
            connector.namespace = reference.namespace.as_str(),
            "Resolved TFConnector"
        );
        Ok(connector.spec.into())
    }
}
