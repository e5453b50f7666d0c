//! # Configuration
//!
//! Process-level configuration, read once at startup.
//!
//! - `controller`: reconciliation, backoff and watch settings
//! - [`ServerConfig`]: HTTP server settings for metrics and probes

pub mod controller;

pub use controller::ControllerConfig;

use std::sync::Arc;

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// How long to wait for the server to bind before giving up (seconds)
    pub startup_timeout_secs: u64,
    /// Readiness poll interval while waiting for the server (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            metrics_port: env_parse("METRICS_PORT", defaults.metrics_port),
            startup_timeout_secs: env_parse(
                "SERVER_STARTUP_TIMEOUT_SECS",
                defaults.startup_timeout_secs,
            ),
            poll_interval_ms: env_parse("SERVER_POLL_INTERVAL_MS", defaults.poll_interval_ms),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Shared, read-only controller configuration
pub type SharedControllerConfig = Arc<ControllerConfig>;

/// Load both configurations from the environment
pub fn load_config() -> (SharedControllerConfig, ServerConfig) {
    (
        Arc::new(ControllerConfig::from_env()),
        ServerConfig::from_env(),
    )
}
