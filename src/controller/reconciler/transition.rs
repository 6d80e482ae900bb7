//! # Transition Table
//!
//! Pure functions mapping the persisted phase and the observed jobs to the next
//! phase, the side effects to carry out, and what the driver should do next.
//! Nothing here touches the cluster.

use super::events::EventKind;
use crate::controller::classifier::{parse_apply_outputs, UNKNOWN_ERROR};
use crate::controller::jobs::{Action, JobInfo};
use crate::crd::Phase;
use std::collections::BTreeMap;

/// Observed state of one lifecycle job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum JobProbe {
    #[default]
    Absent,
    Running,
    /// Finished successfully; carries the harvested logs when they were read
    Succeeded(JobInfo),
    Failed(JobInfo),
}

impl JobProbe {
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, JobProbe::Absent)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, JobProbe::Succeeded(_) | JobProbe::Failed(_))
    }
}

/// Probes of the three lifecycle jobs of one Workspace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobProbes {
    pub apply: JobProbe,
    pub plan: JobProbe,
    pub destroy: JobProbe,
}

/// What the driver learns from an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalObservation {
    /// Nothing is provisioned
    Missing,
    /// Provisioned and matching the declaration
    UpToDate,
    /// Provisioned but drifted from the declaration
    Outdated,
    /// A job is in flight or its result was just consumed
    Pending,
}

impl ExternalObservation {
    #[must_use]
    pub fn resource_exists(self) -> bool {
        !matches!(self, ExternalObservation::Missing)
    }

    #[must_use]
    pub fn resource_up_to_date(self) -> bool {
        !matches!(self, ExternalObservation::Outdated)
    }
}

/// Change to `status.error`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ErrorUpdate {
    #[default]
    Keep,
    Clear,
    Set(String),
}

/// Side effect requested by a transition, carried out in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Resolve the connector and launch the job for this action
    Launch(Action),
    DeleteJob(Action),
    Event(EventKind, String),
}

/// How the observation ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Observed(ExternalObservation),
    /// A job failed with this classified error
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Phase to persist, `None` to keep the current one
    pub phase: Option<Phase>,
    pub error: ErrorUpdate,
    /// Outputs to record, `None` to keep the current ones
    pub outputs: Option<BTreeMap<String, String>>,
    pub effects: Vec<Effect>,
    pub outcome: Outcome,
}

impl Transition {
    fn observed(observation: ExternalObservation) -> Self {
        Self {
            phase: None,
            error: ErrorUpdate::Keep,
            outputs: None,
            effects: Vec::new(),
            outcome: Outcome::Observed(observation),
        }
    }

    fn failed(action: Action, info: &JobInfo) -> Self {
        let message = failure_message(info);
        Self {
            phase: Some(Phase::Unavailable),
            error: ErrorUpdate::Set(message.clone()),
            outputs: None,
            effects: vec![
                Effect::DeleteJob(action),
                Effect::Event(
                    EventKind::ExecutionFailed,
                    format!("{action} failed: {}", info.error_with_pod().unwrap_or_else(|| message.clone())),
                ),
            ],
            outcome: Outcome::Failed(message),
        }
    }

    fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    fn error(mut self, error: ErrorUpdate) -> Self {
        self.error = error;
        self
    }

    fn effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Classified error of a finished job, from the latest failed pod when there is one
fn failure_message(info: &JobInfo) -> String {
    info.error_summary()
        .or_else(|| info.successful_pod().map(|p| p.error.as_str()))
        .unwrap_or(UNKNOWN_ERROR)
        .to_string()
}

/// Next step for a Workspace in `phase` given its jobs
#[must_use]
pub fn observe_transition(phase: Phase, jobs: &JobProbes) -> Transition {
    match phase {
        Phase::Unavailable | Phase::Deleted => Transition::observed(ExternalObservation::Missing),
        Phase::Creating => creating(&jobs.apply),
        Phase::Available => {
            if jobs.plan.is_absent() {
                Transition::observed(ExternalObservation::UpToDate)
                    .phase(Phase::Observing)
                    .effect(Effect::Launch(Action::Plan))
                    .effect(Effect::Event(
                        EventKind::PlanStarted,
                        "checking for drift".to_string(),
                    ))
            } else {
                // A plan survived a restart; pick it up where it is
                let mut transition = observing(&jobs.plan);
                transition.phase.get_or_insert(Phase::Observing);
                transition
            }
        }
        Phase::Observing => observing(&jobs.plan),
        Phase::Deleting => deleting(jobs),
    }
}

fn creating(apply: &JobProbe) -> Transition {
    match apply {
        JobProbe::Absent => Transition::observed(ExternalObservation::UpToDate)
            .phase(Phase::Available)
            .error(ErrorUpdate::Clear),
        JobProbe::Running => Transition::observed(ExternalObservation::Pending),
        JobProbe::Succeeded(info) => {
            let mut transition = Transition::observed(ExternalObservation::Pending)
                .effect(Effect::DeleteJob(Action::Apply));
            transition.outputs = info.output().map(parse_apply_outputs);
            transition
        }
        JobProbe::Failed(info) => Transition::failed(Action::Apply, info),
    }
}

fn observing(plan: &JobProbe) -> Transition {
    match plan {
        JobProbe::Absent => Transition::observed(ExternalObservation::UpToDate)
            .phase(Phase::Available)
            .error(ErrorUpdate::Clear),
        JobProbe::Running => Transition::observed(ExternalObservation::Pending),
        JobProbe::Succeeded(info) if info.exit_code().unwrap_or(0) != 0 => {
            Transition::failed(Action::Plan, info)
        }
        JobProbe::Succeeded(info) if info.no_drift() => {
            Transition::observed(ExternalObservation::UpToDate)
                .phase(Phase::Available)
                .error(ErrorUpdate::Clear)
                .effect(Effect::DeleteJob(Action::Plan))
        }
        JobProbe::Succeeded(_) => Transition::observed(ExternalObservation::Outdated)
            .effect(Effect::DeleteJob(Action::Plan))
            .effect(Effect::Event(
                EventKind::DriftDetected,
                "plan reports pending changes".to_string(),
            )),
        JobProbe::Failed(info) => Transition::failed(Action::Plan, info),
    }
}

fn deleting(jobs: &JobProbes) -> Transition {
    match &jobs.destroy {
        JobProbe::Absent => {
            let mut transition = Transition::observed(ExternalObservation::UpToDate);
            let leftovers = [(Action::Apply, &jobs.apply), (Action::Plan, &jobs.plan)];
            for (action, probe) in leftovers {
                if probe.is_finished() {
                    transition = transition.effect(Effect::DeleteJob(action));
                }
            }
            let busy = leftovers.iter().any(|(_, probe)| !probe.is_absent());
            if !busy {
                transition = transition.effect(Effect::Launch(Action::Destroy));
            }
            transition
        }
        JobProbe::Running => Transition::observed(ExternalObservation::UpToDate),
        JobProbe::Succeeded(_) => Transition::observed(ExternalObservation::Missing)
            .phase(Phase::Deleted)
            .effect(Effect::DeleteJob(Action::Destroy))
            .effect(Effect::Event(
                EventKind::DeletedExternalResource,
                "destroy completed".to_string(),
            )),
        JobProbe::Failed(info) => Transition::failed(Action::Destroy, info),
    }
}

/// Create and Update entry point: launch apply
#[must_use]
pub fn apply_transition() -> Transition {
    Transition::observed(ExternalObservation::Pending)
        .phase(Phase::Creating)
        .effect(Effect::Launch(Action::Apply))
        .effect(Effect::Event(
            EventKind::CreatedExternalResource,
            "apply started".to_string(),
        ))
}

/// Delete entry point
///
/// A stored error or a policy forbidding destroy releases the Workspace without a
/// destroy job. Otherwise destroy starts now, or from the `Deleting` phase once
/// any apply or plan job still present has been dealt with.
#[must_use]
pub fn delete_transition(error: Option<&str>, destroy_allowed: bool, jobs: &JobProbes) -> Transition {
    if let Some(error) = error {
        return Transition::observed(ExternalObservation::Missing)
            .phase(Phase::Deleted)
            .error(ErrorUpdate::Clear)
            .effect(Effect::Event(
                EventKind::DestroySkipped,
                format!("last execution failed, not destroying: {error}"),
            ));
    }
    if !destroy_allowed {
        return Transition::observed(ExternalObservation::Missing)
            .phase(Phase::Deleted)
            .effect(Effect::Event(
                EventKind::DestroySkipped,
                "deletion policy leaves infrastructure in place".to_string(),
            ));
    }

    let transition = Transition::observed(ExternalObservation::Pending).phase(Phase::Deleting);
    if jobs.apply.is_absent() && jobs.plan.is_absent() && jobs.destroy.is_absent() {
        transition.effect(Effect::Launch(Action::Destroy))
    } else {
        transition
    }
}
