//! Restart backoff

use berth_foundation::{BackoffKind, SupervisorSettings};
use std::time::Duration;

/// Upper bound for any backoff delay
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Supervisor policy
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Health check period
    pub health_check_interval: Duration,

    /// Restart attempts before supervision stops
    pub max_restart_attempts: u32,

    /// Base backoff delay
    pub base_delay: Duration,

    /// Pause between stop and start on restart
    pub settle_delay: Duration,

    pub backoff: BackoffKind,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from(&SupervisorSettings::default())
    }
}

impl From<&SupervisorSettings> for SupervisorConfig {
    fn from(settings: &SupervisorSettings) -> Self {
        Self {
            health_check_interval: Duration::from_millis(settings.health_check_interval_ms.max(1)),
            max_restart_attempts: settings.max_restart_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            settle_delay: Duration::from_millis(settings.settle_delay_ms),
            backoff: settings.backoff,
        }
    }
}

impl SupervisorConfig {
    /// Delay before restart attempt `n` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let factor = match self.backoff {
            BackoffKind::Linear => attempt,
            BackoffKind::Exponential => 2u32.saturating_pow(attempt - 1),
        };
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}
