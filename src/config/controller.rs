//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use super::{env_var_opt, env_var_or_default, env_var_or_default_str};
use crate::constants::*;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How often a workspace is observed while a job is in flight or after it converged (seconds)
    pub poll_interval_secs: u64,
    /// Requeue right after a job was launched or reaped (seconds)
    pub short_requeue_secs: u64,
    /// Fibonacci backoff floor for failed reconciliations (seconds)
    pub backoff_min_secs: u64,
    /// Fibonacci backoff ceiling for failed reconciliations (seconds)
    pub backoff_max_secs: u64,
    /// Exponential backoff starting value for watch stream errors (milliseconds)
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value for watch stream errors (milliseconds)
    pub backoff_max_ms: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after stream ends (seconds)
    pub watch_restart_delay_after_end_secs: u64,
    /// Namespace where the controller is deployed
    pub controller_namespace: String,
    /// Restrict the watch to one namespace; all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
    /// Maximum concurrent reconciliations
    pub max_concurrent_reconciliations: usize,
    /// Execution job settings
    pub jobs: JobConfig,
}

/// Settings that shape the execution jobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    /// Image running the `tofu` CLI in the main container
    pub opentofu_image: String,
    /// Image running `git clone` in the init container
    pub git_image: String,
    /// Size of the ephemeral working volume
    pub storage_size: String,
    /// Storage class of the ephemeral working volume (cluster default when unset)
    pub storage_class: Option<String>,
    /// Requested pod restart policy, normalized before use
    pub restart_policy: RestartPolicy,
    /// Deadline for reading pod logs (seconds)
    pub cli_timeout_secs: u64,
    /// Attempts for get-or-create of supporting objects
    pub create_retry_attempts: u32,
    /// Delay between get-or-create attempts (milliseconds)
    pub create_retry_delay_ms: u64,
}

/// Pod restart policy as configured by the operator
///
/// Batch jobs reject `Always`, so [`RestartPolicy::normalized`] maps it to `OnFailure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    Always,
    OnFailure,
    #[default]
    Never,
}

impl RestartPolicy {
    /// Parse a restart policy name; anything unrecognised becomes `Never`
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "always" => Self::Always,
            "onfailure" => Self::OnFailure,
            _ => Self::Never,
        }
    }

    /// The policy actually written into the pod template
    #[must_use]
    pub fn normalized(self) -> &'static str {
        match self {
            Self::Always | Self::OnFailure => "OnFailure",
            Self::Never => "Never",
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            opentofu_image: DEFAULT_OPENTOFU_IMAGE.to_string(),
            git_image: DEFAULT_GIT_IMAGE.to_string(),
            storage_size: DEFAULT_JOB_STORAGE_SIZE.to_string(),
            storage_class: None,
            restart_policy: RestartPolicy::default(),
            cli_timeout_secs: DEFAULT_CLI_TIMEOUT_SECS,
            create_retry_attempts: DEFAULT_CREATE_RETRY_ATTEMPTS,
            create_retry_delay_ms: DEFAULT_CREATE_RETRY_DELAY_MS,
        }
    }
}

impl JobConfig {
    /// Load job settings from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            opentofu_image: env_var_or_default_str("OPENTOFU_IMAGE", DEFAULT_OPENTOFU_IMAGE),
            git_image: env_var_or_default_str("GIT_IMAGE", DEFAULT_GIT_IMAGE),
            storage_size: env_var_or_default_str("JOB_STORAGE_SIZE", DEFAULT_JOB_STORAGE_SIZE),
            storage_class: env_var_opt("JOB_STORAGE_CLASS"),
            restart_policy: env_var_opt("JOB_RESTART_POLICY")
                .map(|v| RestartPolicy::parse(&v))
                .unwrap_or_default(),
            cli_timeout_secs: env_var_or_default("CLI_TIMEOUT_SECS", DEFAULT_CLI_TIMEOUT_SECS),
            // At least one attempt, otherwise nothing would ever be created
            create_retry_attempts: env_var_or_default(
                "CREATE_RETRY_ATTEMPTS",
                DEFAULT_CREATE_RETRY_ATTEMPTS,
            )
            .max(1),
            create_retry_delay_ms: env_var_or_default(
                "CREATE_RETRY_DELAY_MS",
                DEFAULT_CREATE_RETRY_DELAY_MS,
            ),
        }
    }

    /// Deadline for log reads
    #[must_use]
    pub fn cli_timeout(&self) -> Duration {
        Duration::from_secs(self.cli_timeout_secs)
    }

    /// Delay between get-or-create attempts
    #[must_use]
    pub fn create_retry_delay(&self) -> Duration {
        Duration::from_millis(self.create_retry_delay_ms)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            short_requeue_secs: DEFAULT_SHORT_REQUEUE_SECS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            controller_namespace: "krateo-system".to_string(),
            watch_namespace: None,
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
            max_concurrent_reconciliations: 10,
            jobs: JobConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            poll_interval_secs: env_var_or_default(
                "POLL_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL_SECS,
            ),
            short_requeue_secs: env_var_or_default(
                "SHORT_REQUEUE_SECS",
                DEFAULT_SHORT_REQUEUE_SECS,
            ),
            backoff_min_secs: env_var_or_default("BACKOFF_MIN_SECS", DEFAULT_BACKOFF_MIN_SECS),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            watch_restart_delay_after_end_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            ),
            controller_namespace: env_var_or_default_str("POD_NAMESPACE", "krateo-system"),
            watch_namespace: env_var_opt("WATCH_NAMESPACE"),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            log_format: env_var_or_default_str("LOG_FORMAT", "json"),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                10,
            ),
            jobs: JobConfig::from_env(),
        }
    }

    /// Get poll interval duration
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Get short requeue duration
    #[must_use]
    pub fn short_requeue(&self) -> Duration {
        Duration::from_secs(self.short_requeue_secs)
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Get watch restart delay after end duration
    #[must_use]
    pub fn watch_restart_delay_after_end_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_after_end_secs)
    }
}
