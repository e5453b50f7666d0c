//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! The annotation keys and the finalizer token are part of the controller's
//! contract with the cluster and are deliberately not configurable. The
//! remaining values are defaults that can be overridden via environment
//! variables (see [`crate::config`]).

/// Pod template annotation holding the configuration fingerprint
pub const CONFIG_HASH_ANNOTATION: &str = "wave.pusher.com/config-hash";

/// Owner annotation that opts a workload in when opt-in mode is enabled
pub const UPDATE_ON_CONFIG_CHANGE_ANNOTATION: &str = "wave.pusher.com/update-on-config-change";

/// Finalizer placed on every ConfigMap/Secret that has at least one dependent workload
pub const DEPENDENCY_FINALIZER: &str = "wave.pusher.com/finalizer";

/// Field manager and event reporter name
pub const CONTROLLER_NAME: &str = "config-hash-controller";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default deadline for a single reconciliation (seconds)
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 30;

/// Default requeue delay after an optimistic-concurrency conflict (seconds)
pub const DEFAULT_CONFLICT_REQUEUE_SECS: u64 = 1;

/// Default Fibonacci backoff lower bound for reconciliation errors (seconds)
pub const DEFAULT_ERROR_BACKOFF_MIN_SECS: u64 = 5;

/// Default Fibonacci backoff upper bound for reconciliation errors (seconds)
pub const DEFAULT_ERROR_BACKOFF_MAX_SECS: u64 = 300;

/// Default exponential backoff starting value for watch stream errors (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value for watch stream errors (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;
