//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `opentofu_workspace_reconciliations_total` - Total number of reconciliations
//! - `opentofu_workspace_reconciliation_errors_total` - Total number of reconciliation errors
//! - `opentofu_workspace_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `opentofu_workspace_jobs_launched_total{action}` - Execution jobs created
//! - `opentofu_workspace_job_outcomes_total{action,outcome}` - Finished jobs by outcome
//! - `opentofu_workspace_job_deletions_total{action}` - Execution jobs deleted
//! - `opentofu_workspace_phase_transitions_total{from,to}` - Lifecycle phase changes
//! - `opentofu_workspace_requeues_total{reason}` - Requeues by reason

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "opentofu_workspace_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "opentofu_workspace_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "opentofu_workspace_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 120.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static JOBS_LAUNCHED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "opentofu_workspace_jobs_launched_total",
            "Total number of execution jobs created by action",
        ),
        &["action"],
    )
    .expect("Failed to create JOBS_LAUNCHED_TOTAL metric - this should never happen")
});

static JOB_OUTCOMES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "opentofu_workspace_job_outcomes_total",
            "Total number of finished execution jobs by action and outcome",
        ),
        &["action", "outcome"],
    )
    .expect("Failed to create JOB_OUTCOMES_TOTAL metric - this should never happen")
});

static JOB_DELETIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "opentofu_workspace_job_deletions_total",
            "Total number of execution jobs deleted by action",
        ),
        &["action"],
    )
    .expect("Failed to create JOB_DELETIONS_TOTAL metric - this should never happen")
});

static PHASE_TRANSITIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "opentofu_workspace_phase_transitions_total",
            "Total number of lifecycle phase transitions",
        ),
        &["from", "to"],
    )
    .expect("Failed to create PHASE_TRANSITIONS_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "opentofu_workspace_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(JOBS_LAUNCHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(JOB_OUTCOMES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(JOB_DELETIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PHASE_TRANSITIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_jobs_launched(action: &str) {
    JOBS_LAUNCHED_TOTAL.with_label_values(&[action]).inc();
}

/// `outcome` is `succeeded`, `failed` or `drift`
pub fn increment_job_outcomes(action: &str, outcome: &str) {
    JOB_OUTCOMES_TOTAL
        .with_label_values(&[action, outcome])
        .inc();
}

pub fn increment_job_deletions(action: &str) {
    JOB_DELETIONS_TOTAL.with_label_values(&[action]).inc();
}

pub fn increment_phase_transitions(from: &str, to: &str) {
    PHASE_TRANSITIONS_TOTAL.with_label_values(&[from, to]).inc();
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}
