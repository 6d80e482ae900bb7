//! # Execution Jobs
//!
//! Every lifecycle action of a Workspace runs as a Kubernetes Job with a
//! deterministic name, so an in-flight job is rediscovered on every reconciliation
//! without keeping any in-memory state.
//!
//! ## Module Structure
//!
//! - `action.rs` - Apply, Destroy and Plan with their CLI scripts and job names
//! - `template.rs` - Job, ServiceAccount, Role and RoleBinding builders
//! - `orchestrator.rs` - [`KubeJobBackend`], the cluster-backed [`JobBackend`]

mod action;
mod orchestrator;
mod template;

pub use action::{job_name, Action};
pub use orchestrator::KubeJobBackend;
pub use template::{job_owner_reference, JobTemplate, INIT_CONTAINER, MAIN_CONTAINER, MOUNT_PATH};

use crate::controller::classifier::{classify_error, classify_plan_result};
use crate::controller::resolver::ResolvedConnector;
use crate::crd::Workspace;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to create {kind} {name}: {source}")]
    Create {
        kind: &'static str,
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error("failed to look up job {name}: {source}")]
    Lookup {
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error("failed to read logs of pod {pod}: {message}")]
    Logs { pod: String, message: String },
    #[error("no pod log of job {name} could be read: {reasons}")]
    NoLogs { name: String, reasons: String },
    #[error("job {name} is still terminating")]
    Terminating { name: String },
    #[error("failed to delete job {name}: {source}")]
    Delete {
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error("invalid job template: {0}")]
    Template(String),
}

/// Terminal or running state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_finished(self) -> bool {
        self != JobState::Running
    }
}

/// Derive the state of `job` from its conditions, falling back to pod counters
#[must_use]
pub fn job_state(job: &Job) -> JobState {
    let Some(status) = job.status.as_ref() else {
        return JobState::Running;
    };

    for condition in status.conditions.iter().flatten() {
        if condition.status != "True" {
            continue;
        }
        match condition.type_.as_str() {
            "Complete" | "SuccessCriteriaMet" => return JobState::Succeeded,
            "Failed" | "FailureTarget" => return JobState::Failed,
            _ => {}
        }
    }

    let backoff_limit = job
        .spec
        .as_ref()
        .and_then(|s| s.backoff_limit)
        .unwrap_or(6);
    if status.succeeded.unwrap_or(0) > 0 {
        JobState::Succeeded
    } else if status.failed.unwrap_or(0) > backoff_limit {
        JobState::Failed
    } else {
        JobState::Running
    }
}

/// Log of one pod of a finished job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodLog {
    pub pod: String,
    pub text: String,
    /// Classified summary of `text`
    pub error: String,
    pub succeeded: bool,
    /// Exit code of the main container, when it terminated
    pub exit_code: Option<i32>,
}

impl PodLog {
    #[must_use]
    pub fn new(pod: impl Into<String>, text: impl Into<String>, succeeded: bool, exit_code: Option<i32>) -> Self {
        let text = text.into();
        Self {
            pod: pod.into(),
            error: classify_error(&text),
            text,
            succeeded,
            exit_code,
        }
    }
}

/// Logs of every pod of a job, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobInfo {
    pub pods: Vec<PodLog>,
}

impl JobInfo {
    /// Keep every pod log that could be read
    ///
    /// # Errors
    ///
    /// [`JobError::NoLogs`] when not a single log was read, including when the job
    /// has no pods.
    pub fn from_reads(
        job: &str,
        reads: impl IntoIterator<Item = Result<PodLog, JobError>>,
    ) -> Result<Self, JobError> {
        let mut info = JobInfo::default();
        let mut failures = Vec::new();
        for read in reads {
            match read {
                Ok(pod) => info.pods.push(pod),
                Err(e) => failures.push(e.to_string()),
            }
        }

        if info.pods.is_empty() {
            let reasons = if failures.is_empty() {
                "no pods found".to_string()
            } else {
                failures.join("; ")
            };
            return Err(JobError::NoLogs {
                name: job.to_string(),
                reasons,
            });
        }
        for failure in &failures {
            warn!("Skipping pod of job {}: {}", job, failure);
        }
        Ok(info)
    }

    #[must_use]
    pub fn successful_pod(&self) -> Option<&PodLog> {
        self.pods.iter().rev().find(|p| p.succeeded)
    }

    fn latest_failed_pod(&self) -> Option<&PodLog> {
        self.pods.iter().rev().find(|p| !p.succeeded)
    }

    /// Exit code of the successful pod, otherwise of the latest pod
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.successful_pod()
            .or_else(|| self.pods.last())
            .and_then(|p| p.exit_code)
    }

    /// Classified error of the most recent failed pod
    #[must_use]
    pub fn error_summary(&self) -> Option<&str> {
        self.latest_failed_pod().map(|p| p.error.as_str())
    }

    /// `pod: error` of the most recent failed pod, for events and logs
    #[must_use]
    pub fn error_with_pod(&self) -> Option<String> {
        self.latest_failed_pod()
            .map(|p| format!("{}: {}", p.pod, p.error))
    }

    /// Raw output of the successful pod
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        self.successful_pod().map(|p| p.text.as_str())
    }

    /// Whether the successful pod's plan reported no changes
    #[must_use]
    pub fn no_drift(&self) -> bool {
        self.output().is_some_and(classify_plan_result)
    }
}

/// What the state machine needs to know about a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub name: String,
    pub state: JobState,
    /// Deletion was requested; its outcome has already been consumed
    pub terminating: bool,
}

impl JobSnapshot {
    #[must_use]
    pub fn from_job(job: &Job) -> Self {
        Self {
            name: job.metadata.name.clone().unwrap_or_default(),
            state: job_state(job),
            terminating: job.metadata.deletion_timestamp.is_some(),
        }
    }
}

/// Everything the lifecycle needs from the cluster's batch API
///
/// All operations address a job by workspace and action; names come from [`job_name`].
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Launch `action` for `workspace` unless a job with the same name already exists
    ///
    /// Fails with [`JobError::Terminating`] while the previous job of that name is
    /// still being deleted.
    async fn run(
        &self,
        workspace: &Workspace,
        action: Action,
        connector: &ResolvedConnector,
    ) -> Result<(), JobError>;

    /// Current job for `action`, `None` when absent
    ///
    /// A job being deleted is still returned, flagged as terminating.
    async fn get_job(
        &self,
        workspace: &Workspace,
        action: Action,
    ) -> Result<Option<JobSnapshot>, JobError>;

    /// Pod logs of a finished job; unreadable pods are skipped
    async fn get_job_info(&self, workspace: &Workspace, action: Action) -> Result<JobInfo, JobError>;

    /// Delete the job and its pods. Deleting an absent job succeeds.
    async fn delete_job(&self, workspace: &Workspace, action: Action) -> Result<(), JobError>;
}
