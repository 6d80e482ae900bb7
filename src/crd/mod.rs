//! # Custom Resource Definitions
//!
//! CRD types for the OpenTofu Workspace Controller.
//!
//! ## Module Structure
//!
//! - `workspace.rs` - Workspace specification (module, connector reference, policies)
//! - `status.rs` - Status, conditions and the lifecycle phase
//! - `connector.rs` - TFConnector, the credential source consumed by execution jobs

mod connector;
mod status;
mod workspace;

pub use connector::{
    BackendCredential, CredentialFile, EnvSource, NameRef, ProvidersCredentials, SecretKeyRef,
    TFConnector, TFConnectorSpec,
};
pub use status::{Condition, Phase, WorkspaceStatus, READY, SYNCED};
pub use workspace::{
    confined_path, DeletionPolicy, ManagementPolicies, ModuleSource, Reference, Var, Workspace,
    WorkspaceParameters, WorkspaceSpec,
};
