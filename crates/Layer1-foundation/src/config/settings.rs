//! Settings - orchestrator behaviour
//!
//! The `settings` block of `config.json`. Every field has a default and
//! can be overridden by a `BERTH_*` environment variable after loading.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Restart backoff curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// `base * attempt`
    #[default]
    Linear,
    /// `base * 2^(attempt - 1)`
    Exponential,
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Port the HTTP front-end listens on
    pub port: u16,

    /// Size of the cooperating worker pool
    pub workers_count: usize,

    /// Metrics retention (days)
    pub metrics_retention: u32,

    /// Default tracing filter (`info`, `debug`, `berth_core=trace`, ...)
    pub log_level: String,

    /// Container runtime: `auto`, `docker`, `podman`, `memory`
    pub runtime: String,

    /// Image used when a deploy request names none
    pub default_image: String,

    /// Default wait for a task result
    pub task_timeout_ms: u64,

    /// Mailbox polling interval
    pub poll_interval_ms: u64,

    /// Age after which orphaned mailbox artifacts are swept
    pub orphan_retention_secs: u64,

    pub supervisor: SupervisorSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 8080,
            workers_count: 4,
            metrics_retention: 7,
            log_level: "info".to_string(),
            runtime: "auto".to_string(),
            default_image: crate::deployment::DEFAULT_IMAGE.to_string(),
            task_timeout_ms: 30_000,
            poll_interval_ms: 100,
            orphan_retention_secs: 3600,
            supervisor: SupervisorSettings::default(),
        }
    }
}

impl Settings {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn orphan_retention(&self) -> Duration {
        Duration::from_secs(self.orphan_retention_secs)
    }

    /// `BERTH_PORT`, `BERTH_WORKERS`, `BERTH_LOG_LEVEL`, `BERTH_RUNTIME`
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("BERTH_PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => warn!("Ignoring invalid BERTH_PORT: {}", port),
            }
        }
        if let Some(workers) = lookup("BERTH_WORKERS") {
            match workers.parse() {
                Ok(workers) => self.workers_count = workers,
                Err(_) => warn!("Ignoring invalid BERTH_WORKERS: {}", workers),
            }
        }
        if let Some(level) = lookup("BERTH_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(runtime) = lookup("BERTH_RUNTIME") {
            self.runtime = runtime;
        }
    }
}

// ============================================================================
// Supervisor Settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorSettings {
    pub health_check_interval_ms: u64,
    pub max_restart_attempts: u32,
    pub base_delay_ms: u64,
    pub settle_delay_ms: u64,
    pub backoff: BackoffKind,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 10_000,
            max_restart_attempts: 3,
            base_delay_ms: 5_000,
            settle_delay_ms: 1_000,
            backoff: BackoffKind::Linear,
        }
    }
}
