//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default interval between observations of an in-flight or converged workspace (seconds)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Requeue used right after a lifecycle job has been launched or reaped (seconds)
pub const DEFAULT_SHORT_REQUEUE_SECS: u64 = 5;

/// Fibonacci backoff floor for failed reconciliations (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 10;

/// Fibonacci backoff ceiling for failed reconciliations (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Default exponential backoff starting value for the watch stream (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value for the watch stream (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Default container image running the OpenTofu CLI
pub const DEFAULT_OPENTOFU_IMAGE: &str = "ghcr.io/opentofu/opentofu:latest";

/// Default container image used to fetch remote modules
pub const DEFAULT_GIT_IMAGE: &str = "alpine/git:latest";

/// Default size of the per-job ephemeral working volume
pub const DEFAULT_JOB_STORAGE_SIZE: &str = "1Gi";

/// Deadline for log reads against finished pods (seconds)
pub const DEFAULT_CLI_TIMEOUT_SECS: u64 = 300;

/// Attempts for get-or-create of job supporting objects
pub const DEFAULT_CREATE_RETRY_ATTEMPTS: u32 = 3;

/// Delay between get-or-create attempts (milliseconds)
pub const DEFAULT_CREATE_RETRY_DELAY_MS: u64 = 200;

/// Attempts for a status write that keeps hitting resourceVersion conflicts
pub const STATUS_CONFLICT_RETRY_ATTEMPTS: u32 = 3;

/// API group shared by the Workspace and TFConnector kinds
pub const API_GROUP: &str = "opentofu.krateo.io";

/// Finalizer guarding destroy before the Workspace object goes away
pub const WORKSPACE_FINALIZER: &str = "opentofu.krateo.io/finalizer";

/// Annotation set by `wsctl reconcile` to force a reconciliation
pub const RECONCILE_REQUESTED_ANNOTATION: &str = "opentofu.krateo.io/reconcile-requested";

/// Label carrying the owning Workspace name on jobs
pub const WORKSPACE_LABEL: &str = "opentofu.krateo.io/workspace";

/// Label carrying the lifecycle action on jobs
pub const ACTION_LABEL: &str = "opentofu.krateo.io/action";

/// Field manager / event reporter name
pub const CONTROLLER_NAME: &str = "opentofu-workspace-controller";
