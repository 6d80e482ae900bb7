//! # Job Templates
//!
//! Pure builders for the execution job and the objects it runs as.
//!
//! The pod layout:
//!
//! - an ephemeral volume mounted at `/mnt` on both containers
//! - init container `fetch-module`: clones the module (or writes inline HCL) into
//!   `/mnt/workspace`, with only the git credential source in its environment
//! - main container `opentofu`: runs `sh -c "<init> && <verb>"` in the module directory
//!   with the connector's general and provider credential sources
//!
//! Specs are assembled as JSON and decoded into the typed objects, so optional and
//! required upstream fields are validated in one place.

use super::{Action, JobError};
use crate::config::JobConfig;
use crate::constants::{ACTION_LABEL, CONTROLLER_NAME, WORKSPACE_LABEL};
use crate::controller::resolver::ResolvedConnector;
use crate::crd::{confined_path, EnvSource, ModuleSource, Workspace};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Mount point of the ephemeral working volume
pub const MOUNT_PATH: &str = "/mnt";
/// Name of the container running the CLI
pub const MAIN_CONTAINER: &str = "opentofu";
/// Name of the container fetching the module
pub const INIT_CONTAINER: &str = "fetch-module";

const WORKING_VOLUME: &str = "workspace-data";
const CONNECTOR_CONFIG_FILE: &str = "connector-config.tf";

/// Everything needed to render the objects for one action of one workspace
#[derive(Debug, Clone, Copy)]
pub struct JobTemplate<'a> {
    pub workspace: &'a Workspace,
    pub action: Action,
    pub connector: &'a ResolvedConnector,
    pub config: &'a JobConfig,
}

impl<'a> JobTemplate<'a> {
    #[must_use]
    pub fn new(
        workspace: &'a Workspace,
        action: Action,
        connector: &'a ResolvedConnector,
        config: &'a JobConfig,
    ) -> Self {
        Self {
            workspace,
            action,
            connector,
            config,
        }
    }

    /// Job name, also used for the service account, role and binding
    #[must_use]
    pub fn name(&self) -> String {
        super::job_name(&self.workspace.name_any(), self.action)
    }

    /// # Errors
    ///
    /// Fails when the workspace has no namespace.
    pub fn namespace(&self) -> Result<String, JobError> {
        self.workspace
            .namespace()
            .ok_or_else(|| JobError::Template("workspace has no namespace".to_string()))
    }

    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "app.kubernetes.io/managed-by".to_string(),
                CONTROLLER_NAME.to_string(),
            ),
            (WORKSPACE_LABEL.to_string(), self.workspace.name_any()),
            (ACTION_LABEL.to_string(), self.action.as_str().to_string()),
        ])
    }

    /// # Errors
    ///
    /// Fails when the workspace has no namespace.
    pub fn service_account(&self) -> Result<ServiceAccount, JobError> {
        decode(json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": self.metadata()?,
        }))
    }

    /// Role granting the job access to state backend secrets and locks
    ///
    /// # Errors
    ///
    /// Fails when the workspace has no namespace.
    pub fn role(&self) -> Result<Role, JobError> {
        decode(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "Role",
            "metadata": self.metadata()?,
            "rules": [
                { "apiGroups": [""], "resources": ["secrets"], "verbs": ["*"] },
                { "apiGroups": ["coordination.k8s.io"], "resources": ["leases"], "verbs": ["*"] },
            ],
        }))
    }

    /// # Errors
    ///
    /// Fails when the workspace has no namespace.
    pub fn role_binding(&self) -> Result<RoleBinding, JobError> {
        decode(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "RoleBinding",
            "metadata": self.metadata()?,
            "subjects": [{
                "kind": "ServiceAccount",
                "name": self.name(),
                "namespace": self.namespace()?,
            }],
            "roleRef": {
                "apiGroup": "rbac.authorization.k8s.io",
                "kind": "Role",
                "name": self.name(),
            },
        }))
    }

    /// The job itself, owned by the workspace
    ///
    /// # Errors
    ///
    /// Fails when the workspace has no namespace or UID.
    pub fn job(&self) -> Result<Job, JobError> {
        let owner = self
            .workspace
            .controller_owner_ref(&())
            .ok_or_else(|| JobError::Template("workspace has no uid".to_string()))?;

        let mut metadata = self.metadata()?;
        metadata["ownerReferences"] = json!([owner]);

        let mut volumes = vec![json!({
            "name": WORKING_VOLUME,
            "ephemeral": { "volumeClaimTemplate": { "spec": self.claim_spec() } },
        })];
        let mut main_mounts = vec![json!({ "name": WORKING_VOLUME, "mountPath": MOUNT_PATH })];

        for (index, file) in self.connector.credential_files.iter().enumerate() {
            let filename = confined_path(&file.filename);
            if filename.is_empty() {
                continue;
            }
            let volume = format!("credentials-{index}");
            volumes.push(json!({
                "name": volume,
                "secret": {
                    "secretName": file.secret_ref.name,
                    "items": [{ "key": file.secret_ref.key, "path": filename }],
                },
            }));
            main_mounts.push(json!({
                "name": volume,
                "mountPath": format!("{}/{}", self.working_dir(), filename),
                "subPath": filename,
                "readOnly": true,
            }));
        }

        let mut main_env_from = env_from(&self.connector.env_vars);
        main_env_from.extend(env_from(&self.connector.provider_env_vars));

        decode(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": metadata,
            "spec": {
                "backoffLimit": 1,
                "template": {
                    "metadata": { "labels": self.labels() },
                    "spec": {
                        "serviceAccountName": self.name(),
                        "restartPolicy": self.config.restart_policy.normalized(),
                        "volumes": volumes,
                        "initContainers": [{
                            "name": INIT_CONTAINER,
                            "image": self.config.git_image,
                            "workingDir": MOUNT_PATH,
                            "command": ["sh", "-c"],
                            "args": [self.init_script()],
                            "envFrom": env_from(self.connector.git_credentials.as_slice()),
                            "env": self.init_env(),
                            "volumeMounts": [{ "name": WORKING_VOLUME, "mountPath": MOUNT_PATH }],
                        }],
                        "containers": [{
                            "name": MAIN_CONTAINER,
                            "image": self.config.opentofu_image,
                            "workingDir": self.working_dir(),
                            "command": ["sh", "-c"],
                            "args": [self.action.script()],
                            "envFrom": main_env_from,
                            "env": self.main_env(),
                            "volumeMounts": main_mounts,
                        }],
                    },
                },
            },
        }))
    }

    fn metadata(&self) -> Result<Value, JobError> {
        Ok(json!({
            "name": self.name(),
            "namespace": self.namespace()?,
            "labels": self.labels(),
        }))
    }

    fn claim_spec(&self) -> Value {
        let mut spec = json!({
            "accessModes": ["ReadWriteOnce"],
            "resources": { "requests": { "storage": self.config.storage_size } },
        });
        if let Some(class) = &self.config.storage_class {
            spec["storageClassName"] = json!(class);
        }
        spec
    }

    /// Module directory relative to the mount point
    fn module_dir(&self) -> String {
        let params = &self.workspace.spec.workspace;
        match (params.source, params.sanitized_entrypoint()) {
            (ModuleSource::Remote, Some(entrypoint)) => format!("workspace/{entrypoint}"),
            _ => "workspace".to_string(),
        }
    }

    fn working_dir(&self) -> String {
        format!("{MOUNT_PATH}/{}", self.module_dir())
    }

    fn init_script(&self) -> String {
        let params = &self.workspace.spec.workspace;
        let mut steps = match params.source {
            ModuleSource::Remote => vec![format!(
                "git clone -c credential.helper='!f() {{ echo username=author; echo \"password=$GIT_CREDENTIALS\"; }};f' {} workspace",
                shell_quote(&params.module)
            )],
            ModuleSource::Inline => vec![
                "mkdir -p workspace".to_string(),
                "printf '%s' \"$TF_MODULE_CONTENT\" > workspace/main.tf".to_string(),
            ],
        };
        if self.connector.configuration.is_some() {
            let dir = self.module_dir();
            steps.push(format!("mkdir -p {dir}"));
            steps.push(format!(
                "printf '%s' \"$TF_CONNECTOR_CONFIGURATION\" > {dir}/{CONNECTOR_CONFIG_FILE}"
            ));
        }
        steps.join(" && ")
    }

    fn init_env(&self) -> Vec<Value> {
        let params = &self.workspace.spec.workspace;
        let mut env = Vec::new();
        if params.source == ModuleSource::Inline {
            env.push(json!({ "name": "TF_MODULE_CONTENT", "value": params.module }));
        }
        if let Some(configuration) = &self.connector.configuration {
            env.push(json!({ "name": "TF_CONNECTOR_CONFIGURATION", "value": configuration }));
        }
        env
    }

    fn main_env(&self) -> Vec<Value> {
        let mut env = vec![json!({ "name": "TF_IN_AUTOMATION", "value": "1" })];
        env.extend(
            self.workspace
                .spec
                .workspace
                .vars
                .iter()
                .map(|v| json!({ "name": format!("TF_VAR_{}", v.key), "value": v.value })),
        );
        env.extend(self.connector.backend_credentials.iter().map(|c| {
            json!({
                "name": c.env_name(),
                "valueFrom": { "secretKeyRef": { "name": c.secret_ref.name, "key": c.secret_ref.key } },
            })
        }));
        env
    }
}

/// Owner reference pointing at `job`, attached to its supporting objects
#[must_use]
pub fn job_owner_reference(job: &Job) -> Option<OwnerReference> {
    Some(OwnerReference {
        api_version: "batch/v1".to_string(),
        kind: "Job".to_string(),
        name: job.metadata.name.clone()?,
        uid: job.metadata.uid.clone()?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

fn env_from(sources: &[EnvSource]) -> Vec<Value> {
    sources
        .iter()
        .filter_map(|source| {
            let mut value = json!({});
            if let Some(secret) = &source.secret_ref {
                value["secretRef"] = json!({ "name": secret.name });
            } else if let Some(config_map) = &source.config_map_ref {
                value["configMapRef"] = json!({ "name": config_map.name });
            } else {
                return None;
            }
            if let Some(prefix) = &source.prefix {
                value["prefix"] = json!(prefix);
            }
            Some(value)
        })
        .collect()
}

/// Single-quote `value` for `sh`
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, JobError> {
    serde_json::from_value(value).map_err(|e| JobError::Template(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RestartPolicy;
    use crate::crd::{
        BackendCredential, CredentialFile, NameRef, SecretKeyRef, Var, WorkspaceSpec,
    };

    fn workspace(spec: Value) -> Workspace {
        let spec: WorkspaceSpec = serde_json::from_value(spec).unwrap();
        let mut ws = Workspace::new("network", spec);
        ws.metadata.namespace = Some("infra".to_string());
        ws.metadata.uid = Some("0000-1111".to_string());
        ws
    }

    fn remote() -> Workspace {
        workspace(json!({
            "connectorRef": {"name": "conn", "namespace": "infra"},
            "workspace": {"module": "https://example.com/net.git", "entrypoint": "envs/../dev"}
        }))
    }

    fn connector() -> ResolvedConnector {
        ResolvedConnector {
            env_vars: vec![EnvSource {
                config_map_ref: Some(NameRef { name: "settings".to_string() }),
                ..EnvSource::default()
            }],
            provider_env_vars: vec![EnvSource {
                secret_ref: Some(NameRef { name: "aws".to_string() }),
                ..EnvSource::default()
            }],
            git_credentials: Some(EnvSource {
                secret_ref: Some(NameRef { name: "git".to_string() }),
                ..EnvSource::default()
            }),
            ..ResolvedConnector::default()
        }
    }

    fn job_json(ws: &Workspace, action: Action, connector: &ResolvedConnector, config: &JobConfig) -> Value {
        let job = JobTemplate::new(ws, action, connector, config).job().unwrap();
        serde_json::to_value(job).unwrap()
    }

    #[test]
    fn test_job_metadata_and_owner() {
        let ws = remote();
        let job = job_json(&ws, Action::Apply, &connector(), &JobConfig::default());

        assert_eq!(job["metadata"]["name"], "network-opentofu-apply");
        assert_eq!(job["metadata"]["namespace"], "infra");
        assert_eq!(job["metadata"]["labels"][ACTION_LABEL], "apply");
        assert_eq!(job["metadata"]["ownerReferences"][0]["kind"], "Workspace");
        assert_eq!(job["metadata"]["ownerReferences"][0]["uid"], "0000-1111");
        assert_eq!(job["spec"]["backoffLimit"], 1);
    }

    #[test]
    fn test_job_containers_and_env_separation() {
        let ws = remote();
        let job = job_json(&ws, Action::Plan, &connector(), &JobConfig::default());
        let pod = &job["spec"]["template"]["spec"];

        assert_eq!(pod["serviceAccountName"], "network-opentofu-plan");
        assert_eq!(pod["restartPolicy"], "Never");

        let main = &pod["containers"][0];
        assert_eq!(main["name"], MAIN_CONTAINER);
        assert_eq!(main["image"], "ghcr.io/opentofu/opentofu:latest");
        assert_eq!(main["workingDir"], "/mnt/workspace/envs/dev");
        assert_eq!(main["command"], json!(["sh", "-c"]));
        assert_eq!(main["args"][0], Action::Plan.script());
        assert_eq!(
            main["envFrom"],
            json!([{"configMapRef": {"name": "settings"}}, {"secretRef": {"name": "aws"}}])
        );

        let init = &pod["initContainers"][0];
        assert_eq!(init["image"], "alpine/git:latest");
        assert_eq!(init["workingDir"], "/mnt");
        assert_eq!(init["envFrom"], json!([{"secretRef": {"name": "git"}}]));
        let script = init["args"][0].as_str().unwrap();
        assert!(script.starts_with("git clone -c credential.helper="));
        assert!(script.contains("password=$GIT_CREDENTIALS"));
        assert!(script.ends_with("'https://example.com/net.git' workspace"));
    }

    #[test]
    fn test_job_ephemeral_volume() {
        let ws = remote();
        let config = JobConfig {
            storage_class: Some("fast".to_string()),
            ..JobConfig::default()
        };
        let job = job_json(&ws, Action::Apply, &connector(), &config);
        let volume = &job["spec"]["template"]["spec"]["volumes"][0];
        let claim = &volume["ephemeral"]["volumeClaimTemplate"]["spec"];

        assert_eq!(claim["accessModes"], json!(["ReadWriteOnce"]));
        assert_eq!(claim["resources"]["requests"]["storage"], "1Gi");
        assert_eq!(claim["storageClassName"], "fast");
    }

    #[test]
    fn test_restart_policy_is_normalized() {
        let ws = remote();
        let config = JobConfig {
            restart_policy: RestartPolicy::Always,
            ..JobConfig::default()
        };
        let job = job_json(&ws, Action::Destroy, &connector(), &config);
        assert_eq!(job["spec"]["template"]["spec"]["restartPolicy"], "OnFailure");
    }

    #[test]
    fn test_inline_module_and_connector_configuration() {
        let ws = workspace(json!({
            "workspace": {"module": "resource \"null_resource\" \"x\" {}", "source": "Inline", "entrypoint": "ignored"}
        }));
        let connector = ResolvedConnector {
            configuration: Some("provider \"aws\" {}".to_string()),
            ..ResolvedConnector::default()
        };
        let job = job_json(&ws, Action::Apply, &connector, &JobConfig::default());
        let pod = &job["spec"]["template"]["spec"];
        let init = &pod["initContainers"][0];
        let script = init["args"][0].as_str().unwrap();

        assert!(script.contains("> workspace/main.tf"));
        assert!(script.contains("> workspace/connector-config.tf"));
        assert!(!script.contains("git clone"));
        assert_eq!(init["env"][0]["name"], "TF_MODULE_CONTENT");
        assert_eq!(init["env"][1]["name"], "TF_CONNECTOR_CONFIGURATION");
        assert_eq!(pod["containers"][0]["workingDir"], "/mnt/workspace");
    }

    #[test]
    fn test_vars_backend_tokens_and_credential_files() {
        let mut ws = remote();
        ws.spec.workspace.vars = vec![Var {
            key: "region".to_string(),
            value: "eu-west-1".to_string(),
        }];
        let connector = ResolvedConnector {
            backend_credentials: vec![BackendCredential {
                hostname: "app.terraform.io".to_string(),
                secret_ref: SecretKeyRef { name: "tfc".to_string(), key: "token".to_string() },
            }],
            credential_files: vec![CredentialFile {
                filename: "../gcp.json".to_string(),
                secret_ref: SecretKeyRef { name: "gcp".to_string(), key: "key.json".to_string() },
            }],
            ..ResolvedConnector::default()
        };
        let job = job_json(&ws, Action::Apply, &connector, &JobConfig::default());
        let pod = &job["spec"]["template"]["spec"];
        let env = &pod["containers"][0]["env"];

        assert_eq!(env[0], json!({"name": "TF_IN_AUTOMATION", "value": "1"}));
        assert_eq!(env[1], json!({"name": "TF_VAR_region", "value": "eu-west-1"}));
        assert_eq!(env[2]["name"], "TF_TOKEN_app_terraform_io");
        assert_eq!(env[2]["valueFrom"]["secretKeyRef"]["name"], "tfc");

        assert_eq!(pod["volumes"][1]["secret"]["items"][0]["path"], "gcp.json");
        let mount = &pod["containers"][0]["volumeMounts"][1];
        assert_eq!(mount["mountPath"], "/mnt/workspace/envs/dev/gcp.json");
        assert_eq!(mount["subPath"], "gcp.json");
        // No git credentials on the connector, so the init container gets no env sources
        assert_eq!(pod["initContainers"][0]["envFrom"], json!([]));
    }

    #[test]
    fn test_rbac_objects() {
        let ws = remote();
        let connector = connector();
        let config = JobConfig::default();
        let template = JobTemplate::new(&ws, Action::Apply, &connector, &config);

        let role = serde_json::to_value(template.role().unwrap()).unwrap();
        assert_eq!(role["rules"][0]["resources"], json!(["secrets"]));
        assert_eq!(role["rules"][1]["apiGroups"], json!(["coordination.k8s.io"]));
        assert_eq!(role["rules"][1]["verbs"], json!(["*"]));

        let binding = serde_json::to_value(template.role_binding().unwrap()).unwrap();
        assert_eq!(binding["subjects"][0]["kind"], "ServiceAccount");
        assert_eq!(binding["subjects"][0]["name"], "network-opentofu-apply");
        assert_eq!(binding["roleRef"]["kind"], "Role");
        assert_eq!(binding["roleRef"]["apiGroup"], "rbac.authorization.k8s.io");

        let sa = template.service_account().unwrap();
        assert_eq!(sa.metadata.name.as_deref(), Some("network-opentofu-apply"));
    }

    #[test]
    fn test_job_owner_reference() {
        let mut job = Job::default();
        assert!(job_owner_reference(&job).is_none());

        job.metadata.name = Some("network-opentofu-apply".to_string());
        job.metadata.uid = Some("abc".to_string());
        let owner = job_owner_reference(&job).unwrap();
        assert_eq!(owner.kind, "Job");
        assert_eq!(owner.api_version, "batch/v1");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("a'b"), r"'a'\''b'");
    }
}
