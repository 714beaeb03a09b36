//! Directory-backed mailbox
//!
//! ```text
//! <root>/
//! ├── requests/<id>.json    pending task
//! ├── responses/<id>.json   completion record
//! ├── errors/<id>.json      failure record
//! ├── locks/<id>/           claim (exclusive mkdir) + owner.json
//! └── urgent/<id>           cancellation marker
//! ```
//!
//! Records are written to a dot-prefixed temp file and renamed into place, so
//! a reader in another process never sees a partial record. Listings skip
//! dot files.

use super::{
    MailboxFactory, SweepReport, TaskMailbox, DEFAULT_POLL_INTERVAL, ERRORS_DIR, LOCKS_DIR,
    REQUESTS_DIR, RESPONSES_DIR, URGENT_DIR,
};
use crate::response::{CompletionRecord, FailureRecord, TaskFailure, TaskOutcome};
use crate::state::EntryState;
use crate::task::{Task, TaskId};
use async_trait::async_trait;
use berth_foundation::{BerthPaths, DeploymentKey, Error, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

const RECORD_EXT: &str = "json";
const LOCK_OWNER_FILE: &str = "owner.json";

pub struct DirMailbox {
    deployment: DeploymentKey,
    root: PathBuf,
    poll_interval: Duration,
}

impl DirMailbox {
    /// Open (creating the bucket directories if needed)
    pub fn open(deployment: DeploymentKey, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for bucket in [REQUESTS_DIR, RESPONSES_DIR, ERRORS_DIR, LOCKS_DIR, URGENT_DIR] {
            std::fs::create_dir_all(root.join(bucket)).map_err(|e| {
                Error::mailbox(format!(
                    "Failed to create {}: {}",
                    root.join(bucket).display(),
                    e
                ))
            })?;
        }
        Ok(Self {
            deployment,
            root,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ========================================================================
    // Paths
    // ========================================================================

    fn request_path(&self, id: &TaskId) -> PathBuf {
        self.root
            .join(REQUESTS_DIR)
            .join(format!("{}.{}", id, RECORD_EXT))
    }

    fn response_path(&self, id: &TaskId) -> PathBuf {
        self.root
            .join(RESPONSES_DIR)
            .join(format!("{}.{}", id, RECORD_EXT))
    }

    fn error_path(&self, id: &TaskId) -> PathBuf {
        self.root
            .join(ERRORS_DIR)
            .join(format!("{}.{}", id, RECORD_EXT))
    }

    fn lock_path(&self, id: &TaskId) -> PathBuf {
        self.root.join(LOCKS_DIR).join(id.as_str())
    }

    fn marker_path(&self, id: &TaskId) -> PathBuf {
        self.root.join(URGENT_DIR).join(id.as_str())
    }

    // ========================================================================
    // Primitives
    // ========================================================================

    /// Exclusive claim: `mkdir` fails if the lock already exists
    async fn try_lock(&self, id: &TaskId) -> Result<bool> {
        let path = self.lock_path(id);
        match tokio::fs::create_dir(&path).await {
            Ok(()) => {
                let owner = json!({
                    "pid": std::process::id(),
                    "acquiredAt": Utc::now(),
                });
                // Owner info is diagnostic only; the directory is the lock.
                if let Err(e) = write_record(&path.join(LOCK_OWNER_FILE), &owner).await {
                    debug!(task_id = %id, "Failed to write lock owner: {}", e);
                }
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(Error::mailbox(format!(
                "Failed to acquire lock for {}: {}",
                id, e
            ))),
        }
    }

    async fn unlock(&self, id: &TaskId) -> Result<()> {
        remove_dir_if_exists(&self.lock_path(id)).await
    }

    async fn ensure_unfinished(&self, id: &TaskId) -> Result<()> {
        if exists(&self.response_path(id)).await || exists(&self.error_path(id)).await {
            return Err(Error::mailbox(format!(
                "Task {} already has a terminal record",
                id
            )));
        }
        Ok(())
    }

    /// Pending record removal and lock release after a terminal write
    async fn finish(&self, id: &TaskId) -> Result<()> {
        remove_file_if_exists(&self.request_path(id)).await?;
        self.unlock(id).await
    }

    async fn list_ids(&self, bucket: &str) -> Result<Vec<TaskId>> {
        let dir = self.root.join(bucket);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let stem = name
                .strip_suffix(&format!(".{}", RECORD_EXT))
                .unwrap_or(&name);
            match TaskId::parse(stem) {
                Ok(id) => ids.push(id),
                Err(_) => debug!(bucket, file = %name, "Skipping foreign mailbox entry"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn sweep_bucket(&self, bucket: &str, max_age: Duration) -> Result<usize> {
        let dir = self.root.join(bucket);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_older_than(&path, max_age).await {
                continue;
            }
            if bucket == LOCKS_DIR {
                let name = entry.file_name().to_string_lossy().to_string();
                let Ok(id) = TaskId::parse(&name) else {
                    continue;
                };
                // Live claims keep their lock no matter how old.
                if exists(&self.request_path(&id)).await {
                    continue;
                }
                remove_dir_if_exists(&path).await?;
            } else {
                remove_file_if_exists(&path).await?;
            }
            removed += 1;
        }
        Ok(removed)
    }
}

#[async_trait]
impl TaskMailbox for DirMailbox {
    fn deployment(&self) -> &DeploymentKey {
        &self.deployment
    }

    fn backend(&self) -> &'static str {
        "dir"
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn submit(&self, task: &Task) -> Result<()> {
        write_record(&self.request_path(&task.id), task)
            .await
            .map_err(|e| Error::Enqueue(format!("{}: {}", task.id, e)))?;
        debug!(
            task_id = %task.id,
            deployment = %self.deployment,
            command = %task.command,
            "Task enqueued"
        );
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Task>> {
        for id in self.list_ids(REQUESTS_DIR).await? {
            if exists(&self.marker_path(&id)).await {
                // Cancelled before anyone claimed it.
                if !exists(&self.lock_path(&id)).await {
                    remove_file_if_exists(&self.request_path(&id)).await?;
                }
                continue;
            }

            if !self.try_lock(&id).await? {
                continue;
            }

            match read_record::<Task>(&self.request_path(&id)).await {
                Ok(Some(task)) => {
                    debug!(task_id = %id, deployment = %self.deployment, "Task claimed");
                    return Ok(Some(task));
                }
                Ok(None) => {
                    // Finished between listing and locking.
                    self.unlock(&id).await?;
                }
                Err(e) => {
                    self.unlock(&id).await?;
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    async fn release(&self, id: &TaskId) -> Result<()> {
        self.unlock(id).await
    }

    async fn mark_complete(&self, id: &TaskId, response: Value) -> Result<()> {
        self.ensure_unfinished(id).await?;
        let record = CompletionRecord {
            id: id.clone(),
            response,
            completed_at: Utc::now(),
        };
        write_record(&self.response_path(id), &record).await?;
        self.finish(id).await
    }

    async fn mark_error(&self, id: &TaskId, error: TaskFailure) -> Result<()> {
        self.ensure_unfinished(id).await?;
        let record = FailureRecord {
            id: id.clone(),
            error,
            failed_at: Utc::now(),
        };
        write_record(&self.error_path(id), &record).await?;
        self.finish(id).await
    }

    async fn cancel(&self, id: &TaskId) -> Result<()> {
        write_bytes(&self.marker_path(id), Utc::now().to_rfc3339().as_bytes()).await?;
        if !exists(&self.lock_path(id)).await {
            remove_file_if_exists(&self.request_path(id)).await?;
        }
        info!(task_id = %id, deployment = %self.deployment, "Task cancelled");
        Ok(())
    }

    async fn is_cancelled(&self, id: &TaskId) -> Result<bool> {
        Ok(exists(&self.marker_path(id)).await)
    }

    async fn take_outcome(&self, id: &TaskId) -> Result<Option<TaskOutcome>> {
        let response_path = self.response_path(id);
        if let Some(record) = read_record::<CompletionRecord>(&response_path).await? {
            remove_file_if_exists(&response_path).await?;
            remove_file_if_exists(&self.marker_path(id)).await?;
            return Ok(Some(TaskOutcome::Completed(record.response)));
        }

        let error_path = self.error_path(id);
        if let Some(record) = read_record::<FailureRecord>(&error_path).await? {
            remove_file_if_exists(&error_path).await?;
            remove_file_if_exists(&self.marker_path(id)).await?;
            return Ok(Some(TaskOutcome::Failed(record.error)));
        }

        let marker = self.marker_path(id);
        if exists(&marker).await {
            remove_file_if_exists(&marker).await?;
            return Ok(Some(TaskOutcome::Cancelled));
        }

        Ok(None)
    }

    async fn state(&self, id: &TaskId) -> Result<Option<EntryState>> {
        let state = if exists(&self.response_path(id)).await {
            Some(EntryState::Completed)
        } else if exists(&self.error_path(id)).await {
            Some(EntryState::Failed)
        } else if exists(&self.marker_path(id)).await {
            Some(EntryState::Cancelled)
        } else if exists(&self.lock_path(id)).await {
            Some(EntryState::Locked)
        } else if exists(&self.request_path(id)).await {
            Some(EntryState::Pending)
        } else {
            None
        };
        Ok(state)
    }

    async fn pending(&self) -> Result<Vec<TaskId>> {
        self.list_ids(REQUESTS_DIR).await
    }

    async fn sweep(&self, max_age: Duration) -> Result<SweepReport> {
        let report = SweepReport {
            responses: self.sweep_bucket(RESPONSES_DIR, max_age).await?,
            errors: self.sweep_bucket(ERRORS_DIR, max_age).await?,
            markers: self.sweep_bucket(URGENT_DIR, max_age).await?,
            locks: self.sweep_bucket(LOCKS_DIR, max_age).await?,
        };
        if report.total() > 0 {
            info!(
                deployment = %self.deployment,
                removed = report.total(),
                "Swept orphaned mailbox artifacts"
            );
        }
        Ok(report)
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Opens `<home>/deployments/<slug>/mailbox`
pub struct DirMailboxFactory {
    paths: BerthPaths,
    poll_interval: Duration,
}

impl DirMailboxFactory {
    pub fn new(paths: BerthPaths) -> Self {
        Self {
            paths,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl MailboxFactory for DirMailboxFactory {
    fn open(&self, deployment: &DeploymentKey) -> Result<Arc<dyn TaskMailbox>> {
        let mailbox = DirMailbox::open(deployment.clone(), self.paths.mailbox_dir(deployment))?
            .with_poll_interval(self.poll_interval);
        Ok(Arc::new(mailbox))
    }
}

// ============================================================================
// File helpers
// ============================================================================

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn write_bytes(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::mailbox(format!("No parent for {}", path.display())))?;
    let name = path
        .file_name()
        .ok_or_else(|| Error::mailbox(format!("Invalid path {}", path.display())))?
        .to_string_lossy();
    let tmp = parent.join(format!(".{}.tmp-{}", name, std::process::id()));

    tokio::fs::write(&tmp, content).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn write_record<T: Serialize + ?Sized>(path: &Path, record: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(record)?;
    write_bytes(path, &content).await
}

/// `Ok(None)` when the record does not exist
async fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            Error::mailbox(format!("Corrupt mailbox record {}: {}", path.display(), e))
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn is_older_than(path: &Path, max_age: Duration) -> bool {
    let Ok(metadata) = tokio::fs::metadata(path).await else {
        return false;
    };
    match metadata.modified() {
        Ok(modified) => SystemTime::now()
            .duration_since(modified)
            .map(|age| age >= max_age)
            .unwrap_or(false),
        Err(e) => {
            warn!(path = %path.display(), "Cannot read mtime: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskMetadata;
    use serde_json::json;
    use tempfile::TempDir;

    fn mailbox(dir: &TempDir) -> DirMailbox {
        DirMailbox::open(DeploymentKey::new("host", "/x"), dir.path().join("mailbox"))
            .unwrap()
            .with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_layout_created() {
        let dir = TempDir::new().unwrap();
        let mailbox = mailbox(&dir);
        for bucket in [REQUESTS_DIR, RESPONSES_DIR, ERRORS_DIR, LOCKS_DIR, URGENT_DIR] {
            assert!(mailbox.root().join(bucket).is_dir(), "{} missing", bucket);
        }
    }

    #[tokio::test]
    async fn test_complete_roundtrip_consumes_artifact() {
        let dir = TempDir::new().unwrap();
        let mailbox = mailbox(&dir);

        let id = mailbox
            .enqueue("echo", vec![json!("u1")], TaskMetadata::default())
            .await
            .unwrap();
        assert_eq!(mailbox.state(&id).await.unwrap(), Some(EntryState::Pending));

        let task = mailbox.dequeue().await.unwrap().unwrap();
        assert_eq!(task.id, id);
        assert_eq!(mailbox.state(&id).await.unwrap(), Some(EntryState::Locked));

        mailbox.mark_complete(&id, json!({ "ok": 1 })).await.unwrap();
        assert!(!mailbox.request_path(&id).exists());
        assert!(!mailbox.lock_path(&id).exists());

        let response = mailbox
            .check_response(&id, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.data, Some(json!({ "ok": 1 })));
        assert!(!mailbox.response_path(&id).exists());

        // Exactly once: the artifact is gone
        let again = mailbox
            .check_response(&id, Duration::from_millis(30))
            .await;
        assert!(matches!(again, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_error_record() {
        let dir = TempDir::new().unwrap();
        let mailbox = mailbox(&dir);

        let id = mailbox
            .enqueue("fail", vec![], TaskMetadata::default())
            .await
            .unwrap();
        mailbox.dequeue().await.unwrap().unwrap();
        mailbox
            .mark_error(
                &id,
                TaskFailure::new("boom", "AGENT_ERROR").with_details(json!({ "line": 3 })),
            )
            .await
            .unwrap();

        // Terminal states are exclusive
        assert!(mailbox.mark_complete(&id, json!(null)).await.is_err());

        let response = mailbox
            .check_response(&id, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!response.success);
        assert_eq!(response.error_code(), Some("AGENT_ERROR"));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let mailbox = mailbox(&dir);
        let id = mailbox
            .enqueue("only", vec![], TaskMetadata::default())
            .await
            .unwrap();

        let (a, b) = tokio::join!(mailbox.dequeue(), mailbox.dequeue());
        let claimed = [a.unwrap(), b.unwrap()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, id);
    }

    #[tokio::test]
    async fn test_dequeue_oldest_first_and_skips_locked() {
        let dir = TempDir::new().unwrap();
        let mailbox = mailbox(&dir);
        let first = mailbox
            .enqueue("a", vec![], TaskMetadata::default())
            .await
            .unwrap();
        let second = mailbox
            .enqueue("b", vec![], TaskMetadata::default())
            .await
            .unwrap();

        assert_eq!(mailbox.dequeue().await.unwrap().unwrap().id, first);
        assert_eq!(mailbox.dequeue().await.unwrap().unwrap().id, second);
        assert!(mailbox.dequeue().await.unwrap().is_none());

        mailbox.release(&first).await.unwrap();
        assert_eq!(mailbox.dequeue().await.unwrap().unwrap().id, first);
    }

    #[tokio::test]
    async fn test_cancel_before_dequeue() {
        let dir = TempDir::new().unwrap();
        let mailbox = mailbox(&dir);
        let id = mailbox
            .enqueue("slow", vec![], TaskMetadata::default())
            .await
            .unwrap();

        mailbox.cancel(&id).await.unwrap();
        assert!(mailbox.is_cancelled(&id).await.unwrap());
        assert!(mailbox.dequeue().await.unwrap().is_none());

        let response = mailbox
            .check_response(&id, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.error_code(), Some("CANCELLED"));
        assert!(!mailbox.is_cancelled(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_does_not_preempt_claimed_task() {
        let dir = TempDir::new().unwrap();
        let mailbox = mailbox(&dir);
        let id = mailbox
            .enqueue("busy", vec![], TaskMetadata::default())
            .await
            .unwrap();
        mailbox.dequeue().await.unwrap().unwrap();

        mailbox.cancel(&id).await.unwrap();
        assert!(mailbox.request_path(&id).exists());

        // Completion still wins over the marker
        mailbox.mark_complete(&id, json!("done")).await.unwrap();
        let response = mailbox
            .check_response(&id, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(response.success);
        assert!(!mailbox.marker_path(&id).exists());
    }

    #[tokio::test]
    async fn test_listing_ignores_temp_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        let mailbox = mailbox(&dir);
        std::fs::write(mailbox.root().join(REQUESTS_DIR).join(".x.tmp-1"), b"{").unwrap();
        std::fs::write(mailbox.root().join(REQUESTS_DIR).join("bad name.json"), b"{}").unwrap();

        assert!(mailbox.pending().await.unwrap().is_empty());
        assert!(mailbox.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_orphans_only() {
        let dir = TempDir::new().unwrap();
        let mailbox = mailbox(&dir);

        let done = mailbox
            .enqueue("done", vec![], TaskMetadata::default())
            .await
            .unwrap();
        mailbox.dequeue().await.unwrap().unwrap();
        mailbox.mark_complete(&done, json!(1)).await.unwrap();

        let live = mailbox
            .enqueue("live", vec![], TaskMetadata::default())
            .await
            .unwrap();
        mailbox.dequeue().await.unwrap().unwrap();

        // Orphaned lock for a task that no longer exists
        let ghost = TaskId::parse("0000000000001-000000-00000000").unwrap();
        std::fs::create_dir(mailbox.lock_path(&ghost)).unwrap();

        let report = mailbox.sweep(Duration::ZERO).await.unwrap();
        assert_eq!(report.responses, 1);
        assert_eq!(report.locks, 1);
        assert!(mailbox.lock_path(&live).exists());
        assert!(!mailbox.lock_path(&ghost).exists());
    }
}
