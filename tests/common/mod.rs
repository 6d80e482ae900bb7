//! Common test utilities
//!
//! In-memory fakes of the cluster seams the state machine talks to, plus a
//! Workspace builder. Jobs only change state when a test says so.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use opentofu_workspace_controller::controller::jobs::{
    job_name, Action, JobBackend, JobError, JobInfo, JobSnapshot, JobState, PodLog,
};
use opentofu_workspace_controller::controller::reconciler::{EventKind, EventSink, WorkspaceExternal};
use opentofu_workspace_controller::controller::resolver::{
    ConnectorResolver, ResolveError, ResolvedConnector,
};
use opentofu_workspace_controller::crd::{Reference, Workspace};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct FakeJob {
    state: JobState,
    /// Pod log reads in pod order; `Err` holds the name of a pod whose log is gone
    pods: Vec<Result<PodLog, String>>,
    /// Foreground deletion in progress; the job stays visible until [`FakeJobs::settle`]
    terminating: bool,
}

/// Job backend keeping jobs in a map keyed by job name
///
/// Deleting a job only marks it terminating, the way foreground deletion keeps
/// a Job around while its pods go away.
#[derive(Debug, Default)]
pub struct FakeJobs {
    jobs: Mutex<HashMap<String, FakeJob>>,
    /// Actions for which a job was actually created
    pub created: Mutex<Vec<Action>>,
    pub deleted: Mutex<Vec<Action>>,
}

impl FakeJobs {
    fn key(workspace: &Workspace, action: Action) -> String {
        job_name(workspace.metadata.name.as_deref().unwrap_or_default(), action)
    }

    fn with_job(&self, workspace: &Workspace, action: Action, f: impl FnOnce(&mut FakeJob)) {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&Self::key(workspace, action))
            .unwrap_or_else(|| panic!("no {action} job"));
        f(job);
    }

    /// Finish the job for `action` with `state` and the given pod logs
    pub fn finish(&self, workspace: &Workspace, action: Action, state: JobState, info: JobInfo) {
        self.with_job(workspace, action, |job| {
            job.state = state;
            job.pods = info.pods.into_iter().map(Ok).collect();
        });
    }

    /// Add a pod whose log can no longer be read, ahead of the others
    pub fn lose_pod_log(&self, workspace: &Workspace, action: Action, pod: &str) {
        self.with_job(workspace, action, |job| job.pods.insert(0, Err(pod.to_string())));
    }

    /// Drop a job behind the controller's back (TTL controller, manual kubectl delete)
    pub fn vanish(&self, workspace: &Workspace, action: Action) {
        self.jobs.lock().unwrap().remove(&Self::key(workspace, action));
    }

    /// Let a terminating job finish going away
    pub fn settle(&self, workspace: &Workspace, action: Action) {
        let mut jobs = self.jobs.lock().unwrap();
        let key = Self::key(workspace, action);
        if jobs.get(&key).is_some_and(|job| job.terminating) {
            jobs.remove(&key);
        }
    }

    /// A live job exists for `action`
    pub fn exists(&self, workspace: &Workspace, action: Action) -> bool {
        self.jobs
            .lock()
            .unwrap()
            .get(&Self::key(workspace, action))
            .is_some_and(|job| !job.terminating)
    }

    pub fn terminating(&self, workspace: &Workspace, action: Action) -> bool {
        self.jobs
            .lock()
            .unwrap()
            .get(&Self::key(workspace, action))
            .is_some_and(|job| job.terminating)
    }

    pub fn created(&self) -> Vec<Action> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<Action> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobBackend for FakeJobs {
    async fn run(&self, workspace: &Workspace, action: Action, _connector: &ResolvedConnector) -> Result<(), JobError> {
        let mut jobs = self.jobs.lock().unwrap();
        let key = Self::key(workspace, action);
        match jobs.get(&key).map(|job| job.terminating) {
            Some(true) => Err(JobError::Terminating { name: key }),
            Some(false) => Ok(()),
            None => {
                jobs.insert(
                    key,
                    FakeJob {
                        state: JobState::Running,
                        pods: Vec::new(),
                        terminating: false,
                    },
                );
                self.created.lock().unwrap().push(action);
                Ok(())
            }
        }
    }

    async fn get_job(&self, workspace: &Workspace, action: Action) -> Result<Option<JobSnapshot>, JobError> {
        let key = Self::key(workspace, action);
        Ok(self.jobs.lock().unwrap().get(&key).map(|job| JobSnapshot {
            name: key.clone(),
            state: job.state,
            terminating: job.terminating,
        }))
    }

    async fn get_job_info(&self, workspace: &Workspace, action: Action) -> Result<JobInfo, JobError> {
        let key = Self::key(workspace, action);
        let reads: Vec<Result<PodLog, JobError>> = match self.jobs.lock().unwrap().get(&key) {
            // Pods of a terminating job are already gone
            Some(job) if !job.terminating => job
                .pods
                .iter()
                .map(|read| {
                    read.clone().map_err(|pod| JobError::Logs {
                        pod,
                        message: "container log not found".to_string(),
                    })
                })
                .collect(),
            _ => Vec::new(),
        };
        JobInfo::from_reads(&key, reads)
    }

    async fn delete_job(&self, workspace: &Workspace, action: Action) -> Result<(), JobError> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&Self::key(workspace, action)) {
            job.terminating = true;
        }
        self.deleted.lock().unwrap().push(action);
        Ok(())
    }
}

/// Resolver knowing a fixed set of connectors
#[derive(Debug, Default)]
pub struct FakeResolver {
    pub known: Vec<Reference>,
}

#[async_trait]
impl ConnectorResolver for FakeResolver {
    async fn resolve(&self, reference: Option<&Reference>) -> Result<ResolvedConnector, ResolveError> {
        let reference = reference.ok_or(ResolveError::MissingReference)?;
        if self.known.contains(reference) {
            Ok(ResolvedConnector::default())
        } else {
            Err(ResolveError::NotFound {
                namespace: reference.namespace.clone(),
                name: reference.name.clone(),
            })
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeEvents {
    pub published: Mutex<Vec<(EventKind, String)>>,
}

impl FakeEvents {
    pub fn kinds(&self) -> Vec<EventKind> {
        self.published.lock().unwrap().iter().map(|(kind, _)| *kind).collect()
    }
}

#[async_trait]
impl EventSink for FakeEvents {
    async fn publish(&self, _workspace: &Workspace, kind: EventKind, note: &str) {
        self.published.lock().unwrap().push((kind, note.to_string()));
    }
}

pub fn connector_ref() -> Reference {
    Reference {
        name: "aws-connector".to_string(),
        namespace: "infra".to_string(),
    }
}

/// A Workspace wired to [`connector_ref`]; `extra_spec` is merged into the spec
pub fn workspace(name: &str, extra_spec: serde_json::Value) -> Workspace {
    let mut spec = json!({
        "connectorRef": {"name": "aws-connector", "namespace": "infra"},
        "workspace": {"module": "https://github.com/acme/tofu-network.git", "entrypoint": "envs/dev"}
    });
    if let (Some(spec), Some(extra)) = (spec.as_object_mut(), extra_spec.as_object()) {
        for (key, value) in extra {
            spec.insert(key.clone(), value.clone());
        }
    }
    serde_json::from_value(json!({
        "apiVersion": "opentofu.krateo.io/v1alpha1",
        "kind": "Workspace",
        "metadata": {
            "name": name,
            "namespace": "infra",
            "uid": "6f1c2a4e-0000-4000-8000-000000000001",
            "generation": 1
        },
        "spec": spec
    }))
    .expect("valid workspace")
}

/// The same Workspace with a deletion timestamp
pub fn deleting(workspace: &Workspace) -> Workspace {
    let mut value = serde_json::to_value(workspace).expect("serializable workspace");
    value["metadata"]["deletionTimestamp"] = json!("2026-01-01T00:00:00Z");
    value["metadata"]["finalizers"] = json!(["opentofu.krateo.io/finalizer"]);
    serde_json::from_value(value).expect("valid workspace")
}

/// One pod's log
pub fn pod_log(text: &str, succeeded: bool, exit_code: i32) -> JobInfo {
    JobInfo {
        pods: vec![PodLog::new("job-pod-1", text, succeeded, Some(exit_code))],
    }
}

pub struct Harness {
    pub jobs: Arc<FakeJobs>,
    pub events: Arc<FakeEvents>,
    pub external: WorkspaceExternal,
}

pub fn harness() -> Harness {
    let jobs = Arc::new(FakeJobs::default());
    let events = Arc::new(FakeEvents::default());
    let resolver = Arc::new(FakeResolver {
        known: vec![connector_ref()],
    });
    let external = WorkspaceExternal::new(
        Arc::clone(&jobs) as Arc<dyn JobBackend>,
        resolver,
        Arc::clone(&events) as Arc<dyn EventSink>,
    );
    Harness { jobs, events, external }
}
