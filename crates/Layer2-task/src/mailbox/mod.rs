//! Task Mailbox
//!
//! A per-deployment work queue with four logical buckets (pending, locked,
//! completed, failed) plus cancellation markers. Any executor that speaks the
//! same protocol can service tasks, in-process or inside a container.
//!
//! ## Backends
//!
//! - `DirMailbox` - directory layout shared with the deployment container
//! - `MemoryMailbox` - process-local, same semantics (tests, embedded executors)
//!
//! ## Concurrency
//!
//! Claiming a task is the only hard mutual-exclusion point: lock acquisition
//! must fail when a lock for the id already exists. Backends implement it with
//! an exclusive create (directory backend) or a single guarded map (memory).

mod dir;
mod memory;
mod registry;
mod sweeper;

pub use dir::{DirMailbox, DirMailboxFactory};
pub use memory::{MemoryMailbox, MemoryMailboxFactory};
pub use registry::MailboxRegistry;
pub use sweeper::{MailboxSweeper, SweepReport, DEFAULT_ORPHAN_RETENTION};

use crate::response::{TaskFailure, TaskOutcome, TaskResponse};
use crate::state::EntryState;
use crate::task::{Task, TaskId, TaskMetadata};
use async_trait::async_trait;
use berth_foundation::{DeploymentKey, Error, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default polling interval for `check_response`
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// On-disk bucket names (wire contract with in-container executors)
pub const REQUESTS_DIR: &str = "requests";
pub const RESPONSES_DIR: &str = "responses";
pub const ERRORS_DIR: &str = "errors";
pub const LOCKS_DIR: &str = "locks";
pub const URGENT_DIR: &str = "urgent";

/// Mailbox protocol - implement to add new storage backends
#[async_trait]
pub trait TaskMailbox: Send + Sync {
    /// Deployment this mailbox serves
    fn deployment(&self) -> &DeploymentKey;

    /// Backend name (for logs)
    fn backend(&self) -> &'static str;

    /// Interval used by `check_response` between probes
    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Write a fully built task into the pending bucket
    async fn submit(&self, task: &Task) -> Result<()>;

    /// Claim the oldest claimable pending task, if any
    ///
    /// Returns `None` when every pending task is locked, cancelled, or the
    /// bucket is empty.
    async fn dequeue(&self) -> Result<Option<Task>>;

    /// Drop a claim without recording a result (the task becomes claimable again)
    async fn release(&self, id: &TaskId) -> Result<()>;

    /// Record a response, then remove the pending record and the lock
    async fn mark_complete(&self, id: &TaskId, response: Value) -> Result<()>;

    /// Record an error, then remove the pending record and the lock
    async fn mark_error(&self, id: &TaskId, error: TaskFailure) -> Result<()>;

    /// Assert the cancellation marker; drop the pending record if unclaimed
    async fn cancel(&self, id: &TaskId) -> Result<()>;

    async fn is_cancelled(&self, id: &TaskId) -> Result<bool>;

    /// Non-blocking probe: completed, then failed, then cancelled
    ///
    /// A hit consumes the artifact.
    async fn take_outcome(&self, id: &TaskId) -> Result<Option<TaskOutcome>>;

    /// Current state of an id, without consuming anything
    async fn state(&self, id: &TaskId) -> Result<Option<EntryState>>;

    /// Pending ids in dequeue order
    async fn pending(&self) -> Result<Vec<TaskId>>;

    /// Delete terminal artifacts and orphaned locks older than `max_age`
    async fn sweep(&self, max_age: Duration) -> Result<SweepReport>;

    /// Build a task from parts and submit it
    async fn enqueue(
        &self,
        command: &str,
        params: Vec<Value>,
        metadata: TaskMetadata,
    ) -> Result<TaskId> {
        let task = Task::new(self.deployment().clone(), command, params, metadata);
        self.submit(&task).await?;
        Ok(task.id)
    }

    /// Poll for the outcome of `id` until `timeout` elapses
    async fn check_response(&self, id: &TaskId, timeout: Duration) -> Result<TaskResponse> {
        let deadline = tokio::time::Instant::now() + timeout;
        let interval = self.poll_interval();

        loop {
            if let Some(outcome) = self.take_outcome(id).await? {
                debug!(task_id = %id, backend = self.backend(), "Task outcome received");
                return Ok(outcome.into_response());
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(Error::Timeout(format!(
                    "No response for task {} within {}ms",
                    id,
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
        }
    }
}

/// Opens the mailbox for a deployment
pub trait MailboxFactory: Send + Sync {
    fn open(&self, deployment: &DeploymentKey) -> Result<Arc<dyn TaskMailbox>>;
}
