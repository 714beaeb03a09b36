//! Mailbox entry state machine
//!
//! ```text
//! Pending ──dequeue──▶ Locked ──mark_complete──▶ Completed
//!    │                    └──────mark_error─────▶ Failed
//!    └──cancel──▶ Cancelled
//! ```

use serde::{Deserialize, Serialize};

/// Observable state of a task id inside one mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryState {
    /// Waiting in the request area
    Pending,

    /// Claimed by a dequeuer
    Locked,

    /// Response recorded
    Completed,

    /// Error recorded
    Failed,

    /// Cancellation marker asserted and no terminal record yet
    Cancelled,
}

impl EntryState {
    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EntryState::Completed | EntryState::Failed | EntryState::Cancelled
        )
    }

    /// Check if the entry can still be claimed
    pub fn is_claimable(&self) -> bool {
        matches!(self, EntryState::Pending)
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            EntryState::Pending => "Pending",
            EntryState::Locked => "Locked",
            EntryState::Completed => "Completed",
            EntryState::Failed => "Failed",
            EntryState::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
