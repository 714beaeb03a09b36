//! Agent state machine
//!
//! ```text
//! Stopped → Starting → Running ─→ Unhealthy → Restarting ─→ Running
//!                         ▲                        │
//!                         └────────────────────────┘
//!                      (retries exhausted → Stopped)
//! ```

use berth_foundation::DeploymentKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// AgentState
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Stopped,
    Starting,
    Running,
    Unhealthy,
    Restarting,
}

impl AgentState {
    /// Whether the agent is still under supervision
    pub fn is_supervised(&self) -> bool {
        !matches!(self, AgentState::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Stopped => "stopped",
            AgentState::Starting => "starting",
            AgentState::Running => "running",
            AgentState::Unhealthy => "unhealthy",
            AgentState::Restarting => "restarting",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// AgentStatus - runtime record snapshot
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub key: DeploymentKey,
    pub container: String,
    pub state: AgentState,
    /// Restart attempts since the last healthy check
    pub restarts: u32,
    pub started_at: DateTime<Utc>,
}

// ============================================================================
// AgentEvent - lifecycle events
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEventKind {
    Started,
    Unhealthy,
    Restarting { attempt: u32, delay: Duration },
    /// Healthy again after one or more restarts
    Recovered,
    /// Restart attempts exhausted; the agent is no longer tracked
    GaveUp { attempts: u32 },
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentEvent {
    pub key: DeploymentKey,
    pub kind: AgentEventKind,
    pub timestamp: DateTime<Utc>,
}

impl AgentEvent {
    pub fn new(key: DeploymentKey, kind: AgentEventKind) -> Self {
        Self {
            key,
            kind,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display_and_serde() {
        assert_eq!(AgentState::Restarting.to_string(), "restarting");
        assert_eq!(
            serde_json::to_string(&AgentState::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
        assert!(AgentState::Running.is_supervised());
        assert!(!AgentState::Stopped.is_supervised());
    }
}
