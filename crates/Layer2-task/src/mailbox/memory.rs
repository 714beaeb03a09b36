//! In-process mailbox
//!
//! Same observable semantics as the directory backend, minus persistence.
//! All buckets live behind one mutex, so a claim is a single check-and-insert.

use super::{MailboxFactory, SweepReport, TaskMailbox, DEFAULT_POLL_INTERVAL};
use crate::response::{TaskFailure, TaskOutcome};
use crate::state::EntryState;
use crate::task::{Task, TaskId};
use async_trait::async_trait;
use berth_foundation::{DeploymentKey, Error, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Default)]
struct Buckets {
    pending: BTreeMap<TaskId, Task>,
    locks: HashMap<TaskId, Instant>,
    completed: HashMap<TaskId, (Value, Instant)>,
    failed: HashMap<TaskId, (TaskFailure, Instant)>,
    cancelled: HashMap<TaskId, Instant>,
}

impl Buckets {
    fn has_terminal(&self, id: &TaskId) -> bool {
        self.completed.contains_key(id) || self.failed.contains_key(id)
    }
}

pub struct MemoryMailbox {
    deployment: DeploymentKey,
    buckets: Mutex<Buckets>,
    poll_interval: Duration,
}

impl MemoryMailbox {
    pub fn new(deployment: DeploymentKey) -> Self {
        Self {
            deployment,
            buckets: Mutex::new(Buckets::default()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl TaskMailbox for MemoryMailbox {
    fn deployment(&self) -> &DeploymentKey {
        &self.deployment
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn submit(&self, task: &Task) -> Result<()> {
        self.buckets
            .lock()
            .pending
            .insert(task.id.clone(), task.clone());
        debug!(task_id = %task.id, command = %task.command, "Task enqueued (memory)");
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Task>> {
        let mut buckets = self.buckets.lock();

        let cancelled: Vec<TaskId> = buckets
            .pending
            .keys()
            .filter(|id| buckets.cancelled.contains_key(*id) && !buckets.locks.contains_key(*id))
            .cloned()
            .collect();
        for id in cancelled {
            buckets.pending.remove(&id);
        }

        let next = buckets
            .pending
            .iter()
            .find(|(id, _)| !buckets.locks.contains_key(*id) && !buckets.cancelled.contains_key(*id))
            .map(|(_, task)| task.clone());

        if let Some(task) = &next {
            buckets.locks.insert(task.id.clone(), Instant::now());
        }
        Ok(next)
    }

    async fn release(&self, id: &TaskId) -> Result<()> {
        self.buckets.lock().locks.remove(id);
        Ok(())
    }

    async fn mark_complete(&self, id: &TaskId, response: Value) -> Result<()> {
        let mut buckets = self.buckets.lock();
        if buckets.has_terminal(id) {
            return Err(Error::mailbox(format!(
                "Task {} already has a terminal record",
                id
            )));
        }
        buckets
            .completed
            .insert(id.clone(), (response, Instant::now()));
        buckets.pending.remove(id);
        buckets.locks.remove(id);
        Ok(())
    }

    async fn mark_error(&self, id: &TaskId, error: TaskFailure) -> Result<()> {
        let mut buckets = self.buckets.lock();
        if buckets.has_terminal(id) {
            return Err(Error::mailbox(format!(
                "Task {} already has a terminal record",
                id
            )));
        }
        buckets.failed.insert(id.clone(), (error, Instant::now()));
        buckets.pending.remove(id);
        buckets.locks.remove(id);
        Ok(())
    }

    async fn cancel(&self, id: &TaskId) -> Result<()> {
        let mut buckets = self.buckets.lock();
        buckets.cancelled.insert(id.clone(), Instant::now());
        if !buckets.locks.contains_key(id) {
            buckets.pending.remove(id);
        }
        Ok(())
    }

    async fn is_cancelled(&self, id: &TaskId) -> Result<bool> {
        Ok(self.buckets.lock().cancelled.contains_key(id))
    }

    async fn take_outcome(&self, id: &TaskId) -> Result<Option<TaskOutcome>> {
        let mut buckets = self.buckets.lock();
        if let Some((response, _)) = buckets.completed.remove(id) {
            buckets.cancelled.remove(id);
            return Ok(Some(TaskOutcome::Completed(response)));
        }
        if let Some((failure, _)) = buckets.failed.remove(id) {
            buckets.cancelled.remove(id);
            return Ok(Some(TaskOutcome::Failed(failure)));
        }
        if buckets.cancelled.remove(id).is_some() {
            return Ok(Some(TaskOutcome::Cancelled));
        }
        Ok(None)
    }

    async fn state(&self, id: &TaskId) -> Result<Option<EntryState>> {
        let buckets = self.buckets.lock();
        let state = if buckets.completed.contains_key(id) {
            Some(EntryState::Completed)
        } else if buckets.failed.contains_key(id) {
            Some(EntryState::Failed)
        } else if buckets.cancelled.contains_key(id) {
            Some(EntryState::Cancelled)
        } else if buckets.locks.contains_key(id) {
            Some(EntryState::Locked)
        } else if buckets.pending.contains_key(id) {
            Some(EntryState::Pending)
        } else {
            None
        };
        Ok(state)
    }

    async fn pending(&self) -> Result<Vec<TaskId>> {
        Ok(self.buckets.lock().pending.keys().cloned().collect())
    }

    async fn sweep(&self, max_age: Duration) -> Result<SweepReport> {
        let mut buckets = self.buckets.lock();
        let expired = |at: Instant| at.elapsed() >= max_age;
        let mut report = SweepReport::default();

        let before = buckets.completed.len();
        buckets.completed.retain(|_, (_, at)| !expired(*at));
        report.responses = before - buckets.completed.len();

        let before = buckets.failed.len();
        buckets.failed.retain(|_, (_, at)| !expired(*at));
        report.errors = before - buckets.failed.len();

        let before = buckets.cancelled.len();
        buckets.cancelled.retain(|_, at| !expired(*at));
        report.markers = before - buckets.cancelled.len();

        let Buckets { pending, locks, .. } = &mut *buckets;
        let before = locks.len();
        locks.retain(|id, at| pending.contains_key(id) || !expired(*at));
        report.locks = before - locks.len();

        Ok(report)
    }
}

/// Hands out one shared in-memory mailbox per deployment
#[derive(Default)]
pub struct MemoryMailboxFactory {
    mailboxes: Mutex<HashMap<DeploymentKey, Arc<MemoryMailbox>>>,
    poll_interval: Option<Duration>,
}

impl MemoryMailboxFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }
}

impl MailboxFactory for MemoryMailboxFactory {
    fn open(&self, deployment: &DeploymentKey) -> Result<Arc<dyn TaskMailbox>> {
        let mut mailboxes = self.mailboxes.lock();
        let mailbox = mailboxes.entry(deployment.clone()).or_insert_with(|| {
            let mailbox = MemoryMailbox::new(deployment.clone());
            Arc::new(match self.poll_interval {
                Some(interval) => mailbox.with_poll_interval(interval),
                None => mailbox,
            })
        });
        Ok(mailbox.clone())
    }
}
