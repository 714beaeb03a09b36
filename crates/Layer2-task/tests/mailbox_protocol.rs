//! Mailbox wire contract tests
//!
//! `cargo test -p berth-task --test mailbox_protocol`

use berth_foundation::{BerthPaths, Deployment, DeploymentKey, SecurityContext};
use berth_task::{
    DirMailbox, DirMailboxFactory, InboundRequest, MailboxRegistry, OrchestratorConfig,
    TaskMailbox, TaskMetadata, TaskOrchestrator, TaskResponse,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Executor that only knows the directory layout, like an in-container runtime
async fn raw_executor(root: &Path) -> Value {
    loop {
        let mut ids: Vec<String> = std::fs::read_dir(root.join("requests"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| !name.starts_with('.') && name.ends_with(".json"))
            .map(|name| name.trim_end_matches(".json").to_string())
            .collect();
        ids.sort();

        if let Some(id) = ids.first() {
            std::fs::create_dir(root.join("locks").join(id)).unwrap();
            let raw = std::fs::read(root.join("requests").join(format!("{}.json", id))).unwrap();
            let task: Value = serde_json::from_slice(&raw).unwrap();

            let record = json!({
                "id": id,
                "response": { "echo": task["params"][1] },
                "completedAt": "2024-01-01T00:00:00Z",
            });
            let tmp = root.join("responses").join(format!(".{}.tmp", id));
            std::fs::write(&tmp, serde_json::to_vec(&record).unwrap()).unwrap();
            std::fs::rename(&tmp, root.join("responses").join(format!("{}.json", id))).unwrap();
            std::fs::remove_file(root.join("requests").join(format!("{}.json", id))).unwrap();
            std::fs::remove_dir_all(root.join("locks").join(id)).unwrap();
            return task;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_echo_through_directory_mailbox() {
    let dir = TempDir::new().unwrap();
    let paths = BerthPaths::new(dir.path());
    let deployment = Deployment::new(&DeploymentKey::new("host", "/x"), "demo");

    let factory = DirMailboxFactory::new(paths.clone()).with_poll_interval(Duration::from_millis(10));
    let orchestrator = TaskOrchestrator::new(
        Arc::new(MailboxRegistry::new(Arc::new(factory))),
        OrchestratorConfig::default(),
    );
    // Opening creates the layout the executor relies on
    orchestrator
        .mailboxes()
        .get_or_open(&deployment.key())
        .await
        .unwrap();

    let root = paths.mailbox_dir(&deployment.key());
    let executor = tokio::spawn(async move { raw_executor(&root).await });

    let request =
        InboundRequest::new("POST", "/x").with_body(r#"{"command":"echo","params":["hello"]}"#);
    let response = orchestrator
        .handle(
            &deployment,
            &request,
            &SecurityContext::authenticated("u1"),
            Some(Duration::from_secs(10)),
        )
        .await;

    assert_eq!(response, TaskResponse::success(json!({ "echo": "hello" })));

    let task = executor.await.unwrap();
    assert_eq!(task["command"], "echo");
    assert_eq!(task["params"], json!(["u1", "hello"]));
    assert_eq!(task["metadata"]["security"]["callerId"], "u1");

    // Result consumed
    let responses = paths.mailbox_dir(&deployment.key()).join("responses");
    assert_eq!(std::fs::read_dir(responses).unwrap().count(), 0);
}

#[tokio::test]
async fn test_two_workers_claim_each_task_once() {
    let dir = TempDir::new().unwrap();
    let key = DeploymentKey::new("host", "/x");
    let root = dir.path().join("mailbox");

    // Two independent handles on the same directory, like two worker processes
    let a = Arc::new(DirMailbox::open(key.clone(), &root).unwrap());
    let b = Arc::new(DirMailbox::open(key, &root).unwrap());

    let mut submitted = HashSet::new();
    for n in 0..20 {
        let id = a
            .enqueue("work", vec![json!(n)], TaskMetadata::default())
            .await
            .unwrap();
        submitted.insert(id);
    }

    let drain = |mailbox: Arc<DirMailbox>| async move {
        let mut claimed = Vec::new();
        while let Some(task) = mailbox.dequeue().await.unwrap() {
            mailbox.mark_complete(&task.id, json!(null)).await.unwrap();
            claimed.push(task.id);
        }
        claimed
    };

    let (from_a, from_b) = tokio::join!(
        tokio::spawn(drain(Arc::clone(&a))),
        tokio::spawn(drain(Arc::clone(&b)))
    );
    let from_a = from_a.unwrap();
    let from_b = from_b.unwrap();

    let all: Vec<_> = from_a.iter().chain(from_b.iter()).cloned().collect();
    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), unique.len(), "a task was claimed twice");
    assert_eq!(unique, submitted);
}
