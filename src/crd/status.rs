//! # Workspace Status
//!
//! Status types for tracking the lifecycle phase, last failure and outputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Condition type carrying the lifecycle phase as its reason
pub const READY: &str = "Ready";
/// Condition type carrying the health of the last reconciliation
pub const SYNCED: &str = "Synced";

/// Status of the Workspace resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Last classified failure, cleared once the workspace converges again
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Non-sensitive outputs of the last successful apply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<BTreeMap<String, String>>,
    /// Observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}

/// Lifecycle phase of a Workspace, stored as the `Ready` condition reason
///
/// `Deleting` means a destroy job owns the workspace and finalization must wait.
/// `Deleted` means destroy finished (or was skipped) and the finalizer may be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    #[default]
    Unavailable,
    Creating,
    Observing,
    Available,
    Deleting,
    Deleted,
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Unavailable => "Unavailable",
            Phase::Creating => "Creating",
            Phase::Observing => "Observing",
            Phase::Available => "Available",
            Phase::Deleting => "Deleting",
            Phase::Deleted => "Deleted",
        }
    }

    /// Parse a stored reason. Unknown or missing reasons mean `Unavailable`.
    #[must_use]
    pub fn from_reason(reason: Option<&str>) -> Self {
        match reason {
            Some("Creating") => Phase::Creating,
            Some("Observing") => Phase::Observing,
            Some("Available") => Phase::Available,
            Some("Deleting") => Phase::Deleting,
            Some("Deleted") => Phase::Deleted,
            _ => Phase::Unavailable,
        }
    }

    /// Whether the `Ready` condition is `True` in this phase
    #[must_use]
    pub fn is_ready(self) -> bool {
        matches!(self, Phase::Available | Phase::Observing)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl WorkspaceStatus {
    #[must_use]
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == type_)
    }

    /// Current lifecycle phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        Phase::from_reason(self.condition(READY).and_then(|c| c.reason.as_deref()))
    }

    /// Move to `phase`, keeping the transition time when nothing changed
    pub fn set_phase(&mut self, phase: Phase) {
        let status = if phase.is_ready() { "True" } else { "False" };
        self.set_condition(READY, status, phase.as_str(), None);
    }

    /// Record the outcome of the last reconciliation
    pub fn set_synced(&mut self, error: Option<&str>) {
        match error {
            None => self.set_condition(SYNCED, "True", "ReconcileSuccess", None),
            Some(message) => {
                self.set_condition(SYNCED, "False", "ReconcileError", Some(message));
            }
        }
    }

    fn set_condition(&mut self, type_: &str, status: &str, reason: &str, message: Option<&str>) {
        let now = chrono::Utc::now().to_rfc3339();
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.r#type == type_) {
            let transitioned =
                existing.status != status || existing.reason.as_deref() != Some(reason);
            if transitioned {
                existing.last_transition_time = Some(now);
            }
            existing.status = status.to_string();
            existing.reason = Some(reason.to_string());
            existing.message = message.map(str::to_string);
        } else {
            self.conditions.push(Condition {
                r#type: type_.to_string(),
                status: status.to_string(),
                last_transition_time: Some(now),
                reason: Some(reason.to_string()),
                message: message.map(str::to_string),
            });
        }
    }
}
