//! # Lifecycle Scenarios
//!
//! Drive `run_lifecycle` against in-memory jobs, one reconciliation per call,
//! finishing jobs between calls the way the cluster would.

mod common;

use common::{deleting, harness, pod_log, workspace};
use opentofu_workspace_controller::controller::jobs::{Action, JobError, JobInfo, JobState};
use opentofu_workspace_controller::controller::reconciler::{
    run_lifecycle, EventKind, ExternalClient, ExternalObservation, ReconcilerError, Step,
};
use opentofu_workspace_controller::crd::{Phase, WorkspaceStatus};
use serde_json::json;

const APPLY_LOG: &str = "Apply complete! Resources: 1 added, 0 changed, 0 destroyed.\n\nOutputs:\n\nvpc_id = \"vpc-0a1b2c\"\n";
const NO_CHANGES_LOG: &str =
    "No changes. Your infrastructure matches the configuration.\n\nOpenTofu has compared your real infrastructure against your configuration and found no differences, so no changes are needed.\n";
const DRIFT_LOG: &str = "OpenTofu will perform the following actions:\n\n  # aws_vpc.main will be updated in-place\n\nPlan: 0 to add, 1 to change, 0 to destroy.\n";

#[tokio::test]
async fn test_fresh_workspace_converges_through_apply_and_plan() {
    let h = harness();
    let ws = workspace("network", json!({}));
    let mut status = WorkspaceStatus::default();

    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(pass.observation, ExternalObservation::Missing);
    assert_eq!(pass.step, Step::Create);
    assert_eq!(status.phase(), Phase::Creating);
    assert_eq!(h.jobs.created(), vec![Action::Apply]);

    // Still running: nothing changes
    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(pass.observation, ExternalObservation::Pending);
    assert_eq!(pass.step, Step::Wait);
    assert_eq!(status.phase(), Phase::Creating);

    h.jobs.finish(&ws, Action::Apply, JobState::Succeeded, pod_log(APPLY_LOG, true, 0));
    run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(h.jobs.deleted(), vec![Action::Apply]);
    assert_eq!(
        status.outputs.as_ref().and_then(|o| o.get("vpc_id")).map(String::as_str),
        Some("vpc-0a1b2c")
    );

    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(pass.observation, ExternalObservation::UpToDate);
    assert_eq!(status.phase(), Phase::Available);
    assert_eq!(status.error, None);

    run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(status.phase(), Phase::Observing);
    assert_eq!(h.jobs.created(), vec![Action::Apply, Action::Plan]);

    h.jobs.finish(&ws, Action::Plan, JobState::Succeeded, pod_log(NO_CHANGES_LOG, true, 0));
    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(pass.observation, ExternalObservation::UpToDate);
    assert_eq!(pass.step, Step::Wait);
    assert_eq!(status.phase(), Phase::Available);
    assert_eq!(status.error, None);
    assert!(!h.jobs.exists(&ws, Action::Plan));
    assert_eq!(
        h.events.kinds(),
        vec![EventKind::CreatedExternalResource, EventKind::PlanStarted]
    );
}

#[tokio::test]
async fn test_failed_apply_records_classified_error_and_reaps_job() {
    let h = harness();
    let ws = workspace("network", json!({}));
    let mut status = WorkspaceStatus::default();

    run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    h.jobs.finish(
        &ws,
        Action::Apply,
        JobState::Failed,
        pod_log("Error: invalid credentials\n", false, 1),
    );

    let err = run_lifecycle(&h.external, &ws, &mut status).await.unwrap_err();
    assert!(matches!(err, ReconcilerError::ExecutionFailed(ref m) if m == "invalid credentials"));
    assert_eq!(status.phase(), Phase::Unavailable);
    assert_eq!(status.error.as_deref(), Some("invalid credentials"));
    assert!(!h.jobs.exists(&ws, Action::Apply));
    assert_eq!(h.jobs.deleted(), vec![Action::Apply]);
    assert!(h.events.kinds().contains(&EventKind::ExecutionFailed));
}

#[tokio::test]
async fn test_drift_triggers_reapply() {
    let h = harness();
    let ws = workspace("network", json!({}));
    let mut status = WorkspaceStatus::default();
    status.set_phase(Phase::Available);

    run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    h.jobs.finish(&ws, Action::Plan, JobState::Succeeded, pod_log(DRIFT_LOG, true, 0));

    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(pass.observation, ExternalObservation::Outdated);
    assert_eq!(pass.step, Step::Update);
    assert_eq!(status.phase(), Phase::Creating);
    assert_eq!(h.jobs.created(), vec![Action::Plan, Action::Apply]);
    assert!(h.events.kinds().contains(&EventKind::DriftDetected));
}

#[tokio::test]
async fn test_observe_only_policy_never_launches_apply() {
    let h = harness();
    let ws = workspace(
        "network",
        json!({"managementPolicies": {"create": false, "update": false, "delete": false}}),
    );
    let mut status = WorkspaceStatus::default();

    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(pass.step, Step::Wait);
    assert!(h.jobs.created().is_empty());
    assert_eq!(status.phase(), Phase::Unavailable);
}

#[tokio::test]
async fn test_unresolvable_connector_fails_without_phase_change() {
    let h = harness();
    let ws = workspace("network", json!({"connectorRef": {"name": "missing", "namespace": "infra"}}));
    let mut status = WorkspaceStatus::default();

    let err = run_lifecycle(&h.external, &ws, &mut status).await.unwrap_err();
    assert!(matches!(err, ReconcilerError::Resolve(_)));
    assert_eq!(status.phase(), Phase::Unavailable);
    assert!(h.jobs.created().is_empty());
}

#[tokio::test]
async fn test_create_is_idempotent() {
    let h = harness();
    let ws = workspace("network", json!({}));
    let mut status = WorkspaceStatus::default();

    h.external.create(&ws, &mut status).await.unwrap();
    h.external.create(&ws, &mut status).await.unwrap();
    assert_eq!(h.jobs.created(), vec![Action::Apply]);
    assert_eq!(status.phase(), Phase::Creating);
}

#[tokio::test]
async fn test_vanished_jobs_never_regress_below_converged() {
    let h = harness();
    let ws = workspace("network", json!({}));

    // Apply job gone before its result was read
    let mut status = WorkspaceStatus::default();
    status.set_phase(Phase::Creating);
    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(pass.observation, ExternalObservation::UpToDate);
    assert_eq!(status.phase(), Phase::Available);

    // Plan job gone mid-observation
    run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(status.phase(), Phase::Observing);
    h.jobs.vanish(&ws, Action::Plan);
    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(pass.observation, ExternalObservation::UpToDate);
    assert_eq!(pass.step, Step::Wait);
    assert_eq!(status.phase(), Phase::Available);
    assert_eq!(h.jobs.created(), vec![Action::Plan]);
}

#[tokio::test]
async fn test_deletion_runs_destroy_then_releases() {
    let h = harness();
    let ws = deleting(&workspace("network", json!({})));
    let mut status = WorkspaceStatus::default();
    status.set_phase(Phase::Available);

    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(pass.step, Step::Delete);
    assert!(!pass.release);
    assert_eq!(status.phase(), Phase::Deleting);
    // No drift plan once deletion is pending
    assert_eq!(h.jobs.created(), vec![Action::Destroy]);

    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(pass.step, Step::Wait);
    assert!(!pass.release);

    h.jobs.finish(&ws, Action::Destroy, JobState::Succeeded, pod_log("Destroy complete!\n", true, 0));
    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(pass.step, Step::Finalize);
    assert!(pass.release);
    assert_eq!(status.phase(), Phase::Deleted);
    assert!(h.events.kinds().contains(&EventKind::DeletedExternalResource));
}

#[tokio::test]
async fn test_deletion_with_stored_error_skips_destroy() {
    let h = harness();
    let ws = deleting(&workspace("network", json!({})));
    let mut status = WorkspaceStatus {
        error: Some("invalid credentials".to_string()),
        ..WorkspaceStatus::default()
    };
    status.set_phase(Phase::Available);

    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(pass.step, Step::Delete);
    assert!(pass.release);
    assert_eq!(status.phase(), Phase::Deleted);
    assert_eq!(status.error, None);
    assert!(h.jobs.created().is_empty());
}

#[tokio::test]
async fn test_deletion_after_failed_apply_releases_without_destroy() {
    let h = harness();
    let ws = workspace("network", json!({}));
    let mut status = WorkspaceStatus::default();

    run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    h.jobs.finish(&ws, Action::Apply, JobState::Failed, pod_log("Error: invalid credentials\n", false, 1));
    run_lifecycle(&h.external, &ws, &mut status).await.unwrap_err();

    // The stored error goes through the delete entry point, which records the skip
    let pass = run_lifecycle(&h.external, &deleting(&ws), &mut status).await.unwrap();
    assert_eq!(pass.step, Step::Delete);
    assert!(pass.release);
    assert_eq!(status.phase(), Phase::Deleted);
    assert_eq!(status.error, None);
    assert!(!h.jobs.created().contains(&Action::Destroy));
    assert!(h.events.kinds().contains(&EventKind::DestroySkipped));
}

#[tokio::test]
async fn test_deletion_after_failed_destroy_releases_with_skip_event() {
    let h = harness();
    let ws = deleting(&workspace("network", json!({})));
    let mut status = WorkspaceStatus::default();
    status.set_phase(Phase::Available);

    run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    h.jobs.finish(&ws, Action::Destroy, JobState::Failed, pod_log("Error: access denied\n", false, 1));
    let err = run_lifecycle(&h.external, &ws, &mut status).await.unwrap_err();
    assert!(matches!(err, ReconcilerError::ExecutionFailed(ref m) if m == "access denied"));
    assert_eq!(status.phase(), Phase::Unavailable);

    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(pass.step, Step::Delete);
    assert!(pass.release);
    assert_eq!(status.error, None);
    assert_eq!(h.jobs.created(), vec![Action::Destroy]);
    assert_eq!(
        h.events.kinds(),
        vec![EventKind::ExecutionFailed, EventKind::DestroySkipped]
    );
}

#[tokio::test]
async fn test_orphan_policy_releases_in_one_pass() {
    let h = harness();
    let ws = deleting(&workspace("network", json!({"deletionPolicy": "Orphan"})));
    let mut status = WorkspaceStatus::default();
    status.set_phase(Phase::Available);

    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert!(pass.release);
    assert_eq!(status.phase(), Phase::Deleted);
    assert!(h.jobs.created().is_empty());
    assert_eq!(h.events.kinds(), vec![EventKind::DestroySkipped]);
}

#[tokio::test]
async fn test_destroy_waits_for_in_flight_plan() {
    let h = harness();
    let ws = workspace("network", json!({}));
    let mut status = WorkspaceStatus::default();
    status.set_phase(Phase::Available);
    run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(status.phase(), Phase::Observing);

    // Plan still running when deletion arrives
    let ws = deleting(&ws);
    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(pass.step, Step::Wait);

    assert_eq!(h.jobs.created(), vec![Action::Plan]);

    // The finished plan is reaped and destroy starts in the same pass
    h.jobs.finish(&ws, Action::Plan, JobState::Succeeded, pod_log(NO_CHANGES_LOG, true, 0));
    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(pass.step, Step::Delete);
    assert_eq!(status.phase(), Phase::Deleting);
    assert_eq!(h.jobs.created(), vec![Action::Plan, Action::Destroy]);
}

#[tokio::test]
async fn test_outputs_survive_reobserving_terminating_apply() {
    let h = harness();
    let ws = workspace("network", json!({}));
    let mut status = WorkspaceStatus::default();

    run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    h.jobs.finish(&ws, Action::Apply, JobState::Succeeded, pod_log(APPLY_LOG, true, 0));
    run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert!(h.jobs.terminating(&ws, Action::Apply));

    // Foreground deletion keeps the job visible for a while
    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(pass.observation, ExternalObservation::UpToDate);
    assert_eq!(status.phase(), Phase::Available);
    assert_eq!(
        status.outputs.as_ref().and_then(|o| o.get("vpc_id")).map(String::as_str),
        Some("vpc-0a1b2c")
    );
    assert_eq!(h.jobs.deleted(), vec![Action::Apply]);
}

#[tokio::test]
async fn test_terminating_plan_without_drift_never_triggers_update() {
    let h = harness();
    let ws = workspace("network", json!({}));
    let mut status = WorkspaceStatus::default();
    status.set_phase(Phase::Available);

    run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    h.jobs.finish(&ws, Action::Plan, JobState::Succeeded, pod_log(NO_CHANGES_LOG, true, 0));
    run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(status.phase(), Phase::Available);
    assert!(h.jobs.terminating(&ws, Action::Plan));

    // The next drift check waits for the old plan job to go away
    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(pass.observation, ExternalObservation::Pending);
    assert_eq!(pass.step, Step::Wait);
    assert_eq!(status.phase(), Phase::Available);
    assert_eq!(h.jobs.created(), vec![Action::Plan]);
    assert!(!h.events.kinds().contains(&EventKind::DriftDetected));

    h.jobs.settle(&ws, Action::Plan);
    run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(status.phase(), Phase::Observing);
    assert_eq!(h.jobs.created(), vec![Action::Plan, Action::Plan]);
}

#[tokio::test]
async fn test_retry_after_failure_waits_for_old_apply_job() {
    let h = harness();
    let ws = workspace("network", json!({}));
    let mut status = WorkspaceStatus::default();

    run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    h.jobs.finish(&ws, Action::Apply, JobState::Failed, pod_log("Error: invalid credentials\n", false, 1));
    run_lifecycle(&h.external, &ws, &mut status).await.unwrap_err();

    let pass = run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(pass.step, Step::Create);
    assert_eq!(status.phase(), Phase::Unavailable);
    assert_eq!(status.error.as_deref(), Some("invalid credentials"));
    assert_eq!(h.jobs.created(), vec![Action::Apply]);

    h.jobs.settle(&ws, Action::Apply);
    run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    assert_eq!(status.phase(), Phase::Creating);
    assert_eq!(h.jobs.created(), vec![Action::Apply, Action::Apply]);
}

#[tokio::test]
async fn test_failed_job_with_lost_pod_log_is_classified_and_reaped() {
    let h = harness();
    let ws = workspace("network", json!({}));
    let mut status = WorkspaceStatus::default();

    run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    h.jobs.finish(&ws, Action::Apply, JobState::Failed, pod_log("Error: invalid credentials\n", false, 1));
    h.jobs.lose_pod_log(&ws, Action::Apply, "network-opentofu-apply-evicted");

    let err = run_lifecycle(&h.external, &ws, &mut status).await.unwrap_err();
    assert!(matches!(err, ReconcilerError::ExecutionFailed(ref m) if m == "invalid credentials"));
    assert_eq!(status.error.as_deref(), Some("invalid credentials"));
    assert_eq!(h.jobs.deleted(), vec![Action::Apply]);
}

#[tokio::test]
async fn test_job_without_any_readable_log_is_kept() {
    let h = harness();
    let ws = workspace("network", json!({}));
    let mut status = WorkspaceStatus::default();

    run_lifecycle(&h.external, &ws, &mut status).await.unwrap();
    h.jobs.finish(&ws, Action::Apply, JobState::Failed, JobInfo::default());
    h.jobs.lose_pod_log(&ws, Action::Apply, "network-opentofu-apply-evicted");

    let err = run_lifecycle(&h.external, &ws, &mut status).await.unwrap_err();
    assert!(matches!(err, ReconcilerError::Job(JobError::NoLogs { .. })));
    assert_eq!(status.phase(), Phase::Creating);
    assert!(h.jobs.exists(&ws, Action::Apply));
    assert!(h.jobs.deleted().is_empty());
}
