//! Orphan collection
//!
//! Terminal records nobody polled (caller timed out or went away) and locks
//! whose request is gone accumulate forever otherwise. The sweeper walks every
//! open mailbox on an interval and deletes artifacts older than the retention.

use super::MailboxRegistry;
use berth_foundation::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Default retention for unclaimed artifacts
pub const DEFAULT_ORPHAN_RETENTION: Duration = Duration::from_secs(3600);

/// Counts of removed artifacts per bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub responses: usize,
    pub errors: usize,
    pub markers: usize,
    pub locks: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.responses + self.errors + self.markers + self.locks
    }

    pub fn merge(&mut self, other: SweepReport) {
        self.responses += other.responses;
        self.errors += other.errors;
        self.markers += other.markers;
        self.locks += other.locks;
    }
}

pub struct MailboxSweeper {
    registry: Arc<MailboxRegistry>,
    interval: Duration,
    max_age: Duration,
    handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl MailboxSweeper {
    pub fn new(registry: Arc<MailboxRegistry>, interval: Duration, max_age: Duration) -> Self {
        Self {
            registry,
            interval,
            max_age,
            handle: RwLock::new(None),
        }
    }

    /// Sweep every open mailbox once
    ///
    /// A failing mailbox is logged and skipped.
    pub async fn sweep_all(&self) -> SweepReport {
        sweep_registry(&self.registry, self.max_age).await
    }

    /// Start the periodic sweep (replaces a running one)
    pub async fn start(&self) {
        let registry = Arc::clone(&self.registry);
        let interval = self.interval;
        let max_age = self.max_age;

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            loop {
                timer.tick().await;
                let report = sweep_registry(&registry, max_age).await;
                debug!(removed = report.total(), "Completed mailbox sweep cycle");
            }
        });

        let mut guard = self.handle.write().await;
        if let Some(previous) = guard.replace(handle) {
            previous.abort();
        }
    }

    pub async fn stop(&self) {
        let mut guard = self.handle.write().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }
    }

    pub async fn is_running(&self) -> bool {
        self.handle.read().await.is_some()
    }
}

async fn sweep_registry(registry: &MailboxRegistry, max_age: Duration) -> SweepReport {
    let mut report = SweepReport::default();
    for mailbox in registry.all().await {
        let swept: Result<SweepReport> = mailbox.sweep(max_age).await;
        match swept {
            Ok(partial) => report.merge(partial),
            Err(e) => warn!(
                deployment = %mailbox.deployment(),
                "Mailbox sweep failed: {}",
                e
            ),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::MemoryMailboxFactory;
    use crate::task::TaskMetadata;
    use berth_foundation::DeploymentKey;
    use serde_json::json;

    #[tokio::test]
    async fn test_sweep_all_collects_unpolled_results() {
        let registry = Arc::new(MailboxRegistry::new(Arc::new(MemoryMailboxFactory::new())));
        for path in ["/a", "/b"] {
            let mailbox = registry
                .get_or_open(&DeploymentKey::new("host", path))
                .await
                .unwrap();
            let id = mailbox
                .enqueue("x", vec![], TaskMetadata::default())
                .await
                .unwrap();
            mailbox.dequeue().await.unwrap();
            mailbox.mark_complete(&id, json!(null)).await.unwrap();
        }

        let sweeper = MailboxSweeper::new(registry, Duration::from_secs(60), Duration::ZERO);
        let report = sweeper.sweep_all().await;
        assert_eq!(report.responses, 2);
        assert_eq!(report.total(), 2);
    }

    #[tokio::test]
    async fn test_start_stop() {
        let registry = Arc::new(MailboxRegistry::new(Arc::new(MemoryMailboxFactory::new())));
        let sweeper = MailboxSweeper::new(registry, Duration::from_millis(10), DEFAULT_ORPHAN_RETENTION);

        sweeper.start().await;
        assert!(sweeper.is_running().await);
        sweeper.stop().await;
        assert!(!sweeper.is_running().await);
    }
}
