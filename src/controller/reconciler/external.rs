//! # External Client
//!
//! The Observe/Create/Update/Delete surface the driver calls, backed by the
//! transition table. [`WorkspaceExternal`] gathers job probes, asks the table what
//! to do, carries out the effects and applies the result to the working status.

use super::events::EventSink;
use super::managed::deletion_requested;
use super::transition::{
    apply_transition, delete_transition, observe_transition, Effect, ErrorUpdate,
    ExternalObservation, JobProbe, JobProbes, Outcome, Transition,
};
use super::types::ReconcilerError;
use crate::controller::jobs::{Action, JobBackend, JobError, JobInfo, JobState};
use crate::controller::resolver::{ConnectorResolver, ResolvedConnector};
use crate::crd::{Phase, Workspace, WorkspaceStatus};
use crate::observability::metrics;
use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle operations on the infrastructure behind a Workspace
///
/// Every operation mutates `status` in place; the driver persists it afterwards,
/// whether the operation succeeded or not.
#[async_trait]
pub trait ExternalClient: Send + Sync {
    async fn observe(
        &self,
        workspace: &Workspace,
        status: &mut WorkspaceStatus,
    ) -> Result<ExternalObservation, ReconcilerError>;

    async fn create(&self, workspace: &Workspace, status: &mut WorkspaceStatus) -> Result<(), ReconcilerError>;

    async fn update(&self, workspace: &Workspace, status: &mut WorkspaceStatus) -> Result<(), ReconcilerError>;

    async fn delete(&self, workspace: &Workspace, status: &mut WorkspaceStatus) -> Result<(), ReconcilerError>;
}

/// [`ExternalClient`] running OpenTofu through execution jobs
#[derive(Clone)]
pub struct WorkspaceExternal {
    jobs: Arc<dyn JobBackend>,
    resolver: Arc<dyn ConnectorResolver>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for WorkspaceExternal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceExternal").finish_non_exhaustive()
    }
}

impl WorkspaceExternal {
    #[must_use]
    pub fn new(
        jobs: Arc<dyn JobBackend>,
        resolver: Arc<dyn ConnectorResolver>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            jobs,
            resolver,
            events,
        }
    }

    /// Probe the job for `action`, reading its logs only when `harvest` is set
    async fn probe(&self, workspace: &Workspace, action: Action, harvest: bool) -> Result<JobProbe, ReconcilerError> {
        let Some(job) = self.jobs.get_job(workspace, action).await? else {
            return Ok(JobProbe::Absent);
        };
        if job.terminating {
            debug!(job.name = job.name.as_str(), "Job is being deleted, outcome already consumed");
            return Ok(JobProbe::Absent);
        }
        if job.state == JobState::Running {
            return Ok(JobProbe::Running);
        }

        let info = if harvest {
            let info = self.jobs.get_job_info(workspace, action).await?;
            debug!(
                job.name = job.name.as_str(),
                job.state = job.state.as_str(),
                "Harvested {} pod log(s)",
                info.pods.len()
            );
            info
        } else {
            JobInfo::default()
        };

        Ok(match job.state {
            JobState::Failed => JobProbe::Failed(info),
            _ => JobProbe::Succeeded(info),
        })
    }

    /// Probes relevant to `phase`; only the job the phase waits on is harvested
    async fn probes(&self, workspace: &Workspace, phase: Phase) -> Result<JobProbes, ReconcilerError> {
        let mut probes = JobProbes::default();
        match phase {
            Phase::Creating => probes.apply = self.probe(workspace, Action::Apply, true).await?,
            Phase::Available | Phase::Observing => {
                probes.plan = self.probe(workspace, Action::Plan, true).await?;
            }
            Phase::Deleting => {
                probes.destroy = self.probe(workspace, Action::Destroy, true).await?;
                probes.apply = self.probe(workspace, Action::Apply, false).await?;
                probes.plan = self.probe(workspace, Action::Plan, false).await?;
            }
            Phase::Unavailable | Phase::Deleted => {}
        }
        Ok(probes)
    }

    /// Carry out `transition` and fold it into `status`
    ///
    /// Effects run first; if one fails the status is left as it was so the next
    /// reconciliation re-derives the same transition. A launch blocked by a job
    /// still being deleted ends the pass as a neutral wait, status untouched.
    async fn apply(
        &self,
        workspace: &Workspace,
        status: &mut WorkspaceStatus,
        transition: Transition,
    ) -> Result<ExternalObservation, ReconcilerError> {
        let mut connector: Option<ResolvedConnector> = None;

        for effect in &transition.effects {
            match effect {
                Effect::Launch(action) => {
                    if connector.is_none() {
                        connector = Some(
                            self.resolver
                                .resolve(workspace.spec.connector_ref.as_ref())
                                .await?,
                        );
                    }
                    if let Some(connector) = &connector {
                        match self.jobs.run(workspace, *action, connector).await {
                            Ok(()) => {}
                            // The previous job of that name is still going away
                            Err(JobError::Terminating { name }) => {
                                debug!("Job {} is still terminating, deferring launch", name);
                                return Ok(ExternalObservation::Pending);
                            }
                            Err(e) => return Err(e.into()),
                        }
                    }
                }
                Effect::DeleteJob(action) => self.jobs.delete_job(workspace, *action).await?,
                Effect::Event(kind, note) => self.events.publish(workspace, *kind, note).await,
            }
        }

        let from = status.phase();
        if let Some(phase) = transition.phase {
            if phase != from {
                info!(
                    "🔁 Workspace {} phase {} -> {}",
                    workspace.name_any(),
                    from,
                    phase
                );
                metrics::increment_phase_transitions(from.as_str(), phase.as_str());
            }
            status.set_phase(phase);
        }
        match transition.error {
            ErrorUpdate::Keep => {}
            ErrorUpdate::Clear => status.error = None,
            ErrorUpdate::Set(message) => status.error = Some(message),
        }
        if let Some(outputs) = transition.outputs {
            status.outputs = Some(outputs);
        }

        match transition.outcome {
            Outcome::Observed(observation) => Ok(observation),
            Outcome::Failed(message) => {
                warn!("❌ Workspace {} failed: {}", workspace.name_any(), message);
                Err(ReconcilerError::ExecutionFailed(message))
            }
        }
    }

    async fn launch_apply(&self, workspace: &Workspace, status: &mut WorkspaceStatus) -> Result<(), ReconcilerError> {
        self.apply(workspace, status, apply_transition()).await?;
        Ok(())
    }
}

fn record_outcome(phase: Phase, probes: &JobProbes) {
    let (action, probe) = match phase {
        Phase::Creating => (Action::Apply, &probes.apply),
        Phase::Available | Phase::Observing => (Action::Plan, &probes.plan),
        Phase::Deleting => (Action::Destroy, &probes.destroy),
        Phase::Unavailable | Phase::Deleted => return,
    };
    let outcome = match probe {
        JobProbe::Succeeded(info) if action == Action::Plan && !info.no_drift() => "drift",
        JobProbe::Succeeded(_) => "succeeded",
        JobProbe::Failed(_) => "failed",
        JobProbe::Absent | JobProbe::Running => return,
    };
    metrics::increment_job_outcomes(action.as_str(), outcome);
}

#[async_trait]
impl ExternalClient for WorkspaceExternal {
    async fn observe(
        &self,
        workspace: &Workspace,
        status: &mut WorkspaceStatus,
    ) -> Result<ExternalObservation, ReconcilerError> {
        let phase = status.phase();
        // No drift checks once deletion is pending
        if phase == Phase::Available && deletion_requested(workspace, status) {
            return Ok(ExternalObservation::UpToDate);
        }
        let probes = self.probes(workspace, phase).await?;
        record_outcome(phase, &probes);
        let transition = observe_transition(phase, &probes);
        debug!(
            "Observed workspace {} in phase {}: {:?}",
            workspace.name_any(),
            phase,
            transition.outcome
        );
        self.apply(workspace, status, transition).await
    }

    async fn create(&self, workspace: &Workspace, status: &mut WorkspaceStatus) -> Result<(), ReconcilerError> {
        self.launch_apply(workspace, status).await
    }

    async fn update(&self, workspace: &Workspace, status: &mut WorkspaceStatus) -> Result<(), ReconcilerError> {
        self.launch_apply(workspace, status).await
    }

    async fn delete(&self, workspace: &Workspace, status: &mut WorkspaceStatus) -> Result<(), ReconcilerError> {
        let jobs = JobProbes {
            apply: self.probe(workspace, Action::Apply, false).await?,
            plan: self.probe(workspace, Action::Plan, false).await?,
            destroy: self.probe(workspace, Action::Destroy, false).await?,
        };
        let transition = delete_transition(
            status.error.as_deref(),
            workspace.spec.destroy_allowed(),
            &jobs,
        );
        self.apply(workspace, status, transition).await?;
        Ok(())
    }
}
