//! # Job Orchestrator
//!
//! [`KubeJobBackend`] creates, inspects and deletes execution jobs in the
//! Workspace's namespace.
//!
//! Launch order: ServiceAccount, Role, RoleBinding (get-or-create with bounded
//! retries), then the Job, then the Job is written as owner of the three supporting
//! objects so garbage collection removes them with it.

use super::{
    job_name, job_owner_reference, Action, JobBackend, JobError, JobInfo, JobSnapshot,
    JobTemplate, PodLog, INIT_CONTAINER, MAIN_CONTAINER,
};
use crate::config::JobConfig;
use crate::controller::resolver::ResolvedConnector;
use crate::crd::Workspace;
use crate::observability::metrics;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Pod, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::{debug, info, warn, Instrument};

/// Cluster-backed [`JobBackend`]
#[derive(Clone)]
pub struct KubeJobBackend {
    client: Client,
    config: JobConfig,
}

impl Debug for KubeJobBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeJobBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KubeJobBackend {
    #[must_use]
    pub fn new(client: Client, config: JobConfig) -> Self {
        Self { client, config }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Return the existing object or create it, retrying transient failures
    async fn get_or_create<K>(&self, api: &Api<K>, object: &K, kind: &'static str) -> Result<K, JobError>
    where
        K: Resource + Clone + DeserializeOwned + Serialize + Debug,
    {
        let name = object.name_any();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match api.get_opt(&name).await {
                Ok(Some(existing)) => Ok(existing),
                Ok(None) => match api.create(&PostParams::default(), object).await {
                    Ok(created) => {
                        debug!(kind, name = name.as_str(), "Created job supporting object");
                        Ok(created)
                    }
                    // Someone else won the race
                    Err(kube::Error::Api(ae)) if ae.code == 409 => api.get(&name).await,
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };

            match result {
                Ok(found) => return Ok(found),
                Err(source) if attempt >= self.config.create_retry_attempts => {
                    return Err(JobError::Create { kind, name, source });
                }
                Err(e) => {
                    warn!(
                        "Attempt {}/{} to create {} {} failed: {}",
                        attempt, self.config.create_retry_attempts, kind, name, e
                    );
                    tokio::time::sleep(self.config.create_retry_delay()).await;
                }
            }
        }
    }

    async fn set_owner<K>(
        &self,
        api: &Api<K>,
        name: &str,
        kind: &'static str,
        owner: &OwnerReference,
    ) -> Result<(), JobError>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
    {
        let patch = serde_json::json!({ "metadata": { "ownerReferences": [owner] } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|source| JobError::Create {
                kind,
                name: name.to_string(),
                source,
            })
    }

    async fn launch(&self, template: JobTemplate<'_>) -> Result<(), JobError> {
        let namespace = template.namespace()?;
        let name = template.name();
        let action = template.action;

        let jobs: Api<Job> = self.api(&namespace);
        let existing = jobs
            .get_opt(&name)
            .await
            .map_err(|source| JobError::Lookup {
                name: name.clone(),
                source,
            })?;
        if let Some(job) = existing {
            // Creating now would collide with the old job and be taken for success
            if job.metadata.deletion_timestamp.is_some() {
                return Err(JobError::Terminating { name });
            }
            debug!("Job {} already exists, not launching again", name);
            return Ok(());
        }

        let service_accounts: Api<ServiceAccount> = self.api(&namespace);
        let roles: Api<Role> = self.api(&namespace);
        let bindings: Api<RoleBinding> = self.api(&namespace);
        self.get_or_create(&service_accounts, &template.service_account()?, "ServiceAccount")
            .await?;
        self.get_or_create(&roles, &template.role()?, "Role").await?;
        self.get_or_create(&bindings, &template.role_binding()?, "RoleBinding")
            .await?;

        let job = match jobs.create(&PostParams::default(), &template.job()?).await {
            Ok(job) => {
                metrics::increment_jobs_launched(action.as_str());
                info!("🚀 Launched {} job {}/{}", action, namespace, name);
                job
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                jobs.get(&name).await.map_err(|source| JobError::Lookup {
                    name: name.clone(),
                    source,
                })?
            }
            Err(source) => {
                return Err(JobError::Create {
                    kind: "Job",
                    name,
                    source,
                })
            }
        };

        let owner = job_owner_reference(&job)
            .ok_or_else(|| JobError::Template(format!("job {name} has no uid")))?;
        self.set_owner(&service_accounts, &name, "ServiceAccount", &owner)
            .await?;
        self.set_owner(&roles, &name, "Role", &owner).await?;
        self.set_owner(&bindings, &name, "RoleBinding", &owner)
            .await?;

        Ok(())
    }

    /// Read one pod's output, preferring the CLI container over the init container
    ///
    /// The read runs in its own task so cancelling the reconciliation does not
    /// abort it half-way; it is bounded by the configured CLI timeout instead.
    async fn read_pod_log(&self, pods: Api<Pod>, pod: String) -> Result<String, JobError> {
        let deadline = self.config.cli_timeout();
        let pod_name = pod.clone();

        let read = tokio::spawn(async move {
            let main = LogParams {
                container: Some(MAIN_CONTAINER.to_string()),
                ..LogParams::default()
            };
            match pods.logs(&pod, &main).await {
                Ok(text) if !text.trim().is_empty() => Ok(text),
                _ => {
                    let init = LogParams {
                        container: Some(INIT_CONTAINER.to_string()),
                        ..LogParams::default()
                    };
                    pods.logs(&pod, &init).await
                }
            }
        });

        match tokio::time::timeout(deadline, read).await {
            Ok(Ok(Ok(text))) => Ok(text),
            Ok(Ok(Err(e))) => Err(JobError::Logs {
                pod: pod_name,
                message: e.to_string(),
            }),
            Ok(Err(e)) => Err(JobError::Logs {
                pod: pod_name,
                message: e.to_string(),
            }),
            Err(_) => Err(JobError::Logs {
                pod: pod_name,
                message: format!("timed out after {}s", deadline.as_secs()),
            }),
        }
    }
}

fn namespace_of(workspace: &Workspace) -> Result<String, JobError> {
    workspace
        .namespace()
        .ok_or_else(|| JobError::Template("workspace has no namespace".to_string()))
}

/// Exit code of the CLI container, when it has terminated
fn main_exit_code(pod: &Pod) -> Option<i32> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .find(|c| c.name == MAIN_CONTAINER)?
        .state
        .as_ref()?
        .terminated
        .as_ref()
        .map(|t| t.exit_code)
}

fn pod_succeeded(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        == Some("Succeeded")
}

#[async_trait]
impl JobBackend for KubeJobBackend {
    async fn run(
        &self,
        workspace: &Workspace,
        action: Action,
        connector: &ResolvedConnector,
    ) -> Result<(), JobError> {
        let template = JobTemplate::new(workspace, action, connector, &self.config);
        let span = tracing::span!(
            tracing::Level::INFO,
            "jobs.run",
            job.name = template.name().as_str(),
            job.namespace = workspace.namespace().unwrap_or_default().as_str(),
            job.action = action.as_str()
        );
        self.launch(template).instrument(span).await
    }

    async fn get_job(
        &self,
        workspace: &Workspace,
        action: Action,
    ) -> Result<Option<JobSnapshot>, JobError> {
        let name = job_name(&workspace.name_any(), action);
        let jobs: Api<Job> = self.api(&namespace_of(workspace)?);
        let job = jobs
            .get_opt(&name)
            .await
            .map_err(|source| JobError::Lookup { name, source })?;
        Ok(job.as_ref().map(JobSnapshot::from_job))
    }

    async fn get_job_info(&self, workspace: &Workspace, action: Action) -> Result<JobInfo, JobError> {
        let name = job_name(&workspace.name_any(), action);
        let pods: Api<Pod> = self.api(&namespace_of(workspace)?);

        let mut list = pods
            .list(&ListParams::default().labels(&format!("job-name={name}")))
            .await
            .map_err(|source| JobError::Lookup {
                name: name.clone(),
                source,
            })?
            .items;
        list.sort_by(|a, b| a.creation_timestamp().cmp(&b.creation_timestamp()));

        let mut reads = Vec::with_capacity(list.len());
        for pod in list {
            let pod_name = pod.name_any();
            let read = self
                .read_pod_log(pods.clone(), pod_name.clone())
                .await
                .map(|text| PodLog::new(pod_name, text, pod_succeeded(&pod), main_exit_code(&pod)));
            reads.push(read);
        }
        let info = JobInfo::from_reads(&name, reads)?;

        debug!("Read logs of {} pod(s) for job {}", info.pods.len(), name);
        Ok(info)
    }

    async fn delete_job(&self, workspace: &Workspace, action: Action) -> Result<(), JobError> {
        let name = job_name(&workspace.name_any(), action);
        let jobs: Api<Job> = self.api(&namespace_of(workspace)?);

        match jobs.delete(&name, &DeleteParams::foreground()).await {
            Ok(_) => {
                metrics::increment_job_deletions(action.as_str());
                info!("🗑️  Deleted {} job {}", action, name);
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(source) => Err(JobError::Delete { name, source }),
        }
    }
}
