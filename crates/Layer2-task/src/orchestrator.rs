//! Task Orchestrator
//!
//! Turns a resolved inbound request into a [`Task`], hands it to the
//! deployment's mailbox and waits for the outcome.
//!
//! ## Request mapping
//!
//! | Source                          | Becomes                                  |
//! |---------------------------------|------------------------------------------|
//! | body `command`                  | task command                             |
//! | last non-empty URL path segment | task command (no body `command`)         |
//! | nothing                         | `"index"`                                |
//! | body `params` (array/singleton) | positional params, verbatim              |
//! | other body fields               | positional params, in insertion order    |
//! | non-JSON body                   | one string param                         |
//! | query values                    | appended after body params               |
//! | caller id                       | always the first param                   |
//!
//! ## Example
//!
//! ```ignore
//! let orchestrator = TaskOrchestrator::new(mailboxes, OrchestratorConfig::default());
//! let task = orchestrator.create_task(&deployment, &request, &security, &request.query_pairs());
//! let response = orchestrator.execute_task(task, None).await;
//! ```

use crate::mailbox::{MailboxRegistry, TaskMailbox};
use crate::response::TaskResponse;
use crate::task::{InboundRequest, Task, TaskId, TaskMetadata};
use berth_foundation::{Deployment, DeploymentKey, Error, ErrorCode, Result, SecurityContext};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Command used when neither the body nor the URL names one
pub const DEFAULT_COMMAND: &str = "index";

/// Default wait for a task outcome
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Wait applied when `execute_task` gets no explicit timeout
    pub default_timeout: Duration,

    /// Assert a cancellation marker when the caller's wait runs out
    pub cancel_on_timeout: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TASK_TIMEOUT,
            cancel_on_timeout: true,
        }
    }
}

pub struct TaskOrchestrator {
    mailboxes: Arc<MailboxRegistry>,
    config: OrchestratorConfig,
}

impl TaskOrchestrator {
    pub fn new(mailboxes: Arc<MailboxRegistry>, config: OrchestratorConfig) -> Self {
        Self { mailboxes, config }
    }

    pub fn mailboxes(&self) -> &Arc<MailboxRegistry> {
        &self.mailboxes
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // ========================================================================
    // Task construction (no I/O)
    // ========================================================================

    pub fn create_task(
        &self,
        deployment: &Deployment,
        request: &InboundRequest,
        security: &SecurityContext,
        query: &[(String, String)],
    ) -> Task {
        let body = parse_body(request.body.as_deref());

        let command = body
            .command
            .or_else(|| last_segment(request.path()))
            .unwrap_or_else(|| DEFAULT_COMMAND.to_string());

        let mut params = Vec::with_capacity(body.params.len() + query.len() + 1);
        params.push(Value::String(security.caller_id.clone()));
        params.extend(body.params);
        params.extend(query.iter().map(|(_, v)| Value::String(v.clone())));

        let metadata = TaskMetadata {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            timestamp: Utc::now(),
            security: security.clone(),
        };

        Task::new(deployment.key(), command, params, metadata)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Enqueue `task` and wait for its outcome
    ///
    /// Never fails: every error is folded into the `{success:false}` shape.
    /// Enqueue, timeout and cancellation keep their own codes, anything else
    /// becomes `TASK_EXECUTION_ERROR`.
    pub async fn execute_task(&self, task: Task, timeout: Option<Duration>) -> TaskResponse {
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let task_id = task.id.clone();

        match self.run(&task, timeout).await {
            Ok(response) => {
                debug!(
                    task_id = %task_id,
                    success = response.success,
                    "Task finished"
                );
                response
            }
            Err(e) => {
                let code = match e.code() {
                    code @ (ErrorCode::TaskEnqueueError
                    | ErrorCode::Timeout
                    | ErrorCode::Cancelled) => code,
                    _ => ErrorCode::TaskExecutionError,
                };
                warn!(task_id = %task_id, code = code.as_str(), "Task failed: {}", e);
                TaskResponse::from_code(e.to_string(), code)
            }
        }
    }

    /// `create_task` with the request's own query string, then `execute_task`
    pub async fn handle(
        &self,
        deployment: &Deployment,
        request: &InboundRequest,
        security: &SecurityContext,
        timeout: Option<Duration>,
    ) -> TaskResponse {
        let query = request.query_pairs();
        let task = self.create_task(deployment, request, security, &query);
        info!(
            task_id = %task.id,
            deployment = %deployment.key(),
            command = %task.command,
            "Dispatching task"
        );
        self.execute_task(task, timeout).await
    }

    /// Best-effort cancellation of a task on `deployment`
    pub async fn cancel_task(&self, deployment: &DeploymentKey, id: &TaskId) -> Result<()> {
        let mailbox = self.mailboxes.get_or_open(deployment).await?;
        mailbox.cancel(id).await
    }

    async fn run(&self, task: &Task, timeout: Duration) -> Result<TaskResponse> {
        let mailbox = self.mailboxes.get_or_open(&task.deployment).await?;

        mailbox.submit(task).await.map_err(|e| match e {
            Error::Enqueue(_) => e,
            other => Error::Enqueue(other.to_string()),
        })?;

        match mailbox.check_response(&task.id, timeout).await {
            Err(Error::Timeout(message)) => {
                if self.config.cancel_on_timeout {
                    cancel_quietly(mailbox.as_ref(), &task.id).await;
                }
                Err(Error::Timeout(message))
            }
            other => other,
        }
    }
}

async fn cancel_quietly(mailbox: &dyn TaskMailbox, id: &TaskId) {
    if let Err(e) = mailbox.cancel(id).await {
        warn!(task_id = %id, "Cancel after timeout failed: {}", e);
    }
}

// ============================================================================
// Body parsing
// ============================================================================

#[derive(Default)]
struct ParsedBody {
    command: Option<String>,
    params: Vec<Value>,
}

fn parse_body(body: Option<&str>) -> ParsedBody {
    let Some(raw) = body.filter(|b| !b.trim().is_empty()) else {
        return ParsedBody::default();
    };

    let map = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return ParsedBody {
                command: None,
                params: vec![other],
            }
        }
        Err(_) => {
            return ParsedBody {
                command: None,
                params: vec![Value::String(raw.to_string())],
            }
        }
    };

    let command = map
        .get("command")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    let params = match map.get("params") {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => map
            .iter()
            .filter(|(key, _)| key.as_str() != "command")
            .map(|(_, value)| value.clone())
            .collect(),
        Some(single) => vec![single.clone()],
    };

    ParsedBody { command, params }
}

fn last_segment(path: &str) -> Option<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::{DirMailboxFactory, MemoryMailboxFactory, REQUESTS_DIR};
    use crate::response::TaskFailure;
    use berth_foundation::BerthPaths;
    use serde_json::json;
    use tempfile::TempDir;

    fn deployment() -> Deployment {
        Deployment::new(&DeploymentKey::new("host", "/x"), "demo")
    }

    fn orchestrator() -> TaskOrchestrator {
        let factory = MemoryMailboxFactory::new().with_poll_interval(Duration::from_millis(5));
        TaskOrchestrator::new(
            Arc::new(MailboxRegistry::new(Arc::new(factory))),
            OrchestratorConfig::default(),
        )
    }

    fn build(request: InboundRequest) -> Task {
        let query = request.query_pairs();
        orchestrator().create_task(
            &deployment(),
            &request,
            &SecurityContext::authenticated("u1"),
            &query,
        )
    }

    #[test]
    fn test_explicit_command_and_params() {
        let task = build(
            InboundRequest::new("POST", "/x/ignored")
                .with_body(r#"{"command":"echo","params":["hello"]}"#),
        );
        assert_eq!(task.command, "echo");
        assert_eq!(task.params, vec![json!("u1"), json!("hello")]);
        assert_eq!(task.metadata.method, "POST");
        assert_eq!(task.metadata.security.caller_id, "u1");
    }

    #[test]
    fn test_params_singleton() {
        let task = build(InboundRequest::new("POST", "/x").with_body(r#"{"params":{"a":1}}"#));
        assert_eq!(task.params, vec![json!("u1"), json!({ "a": 1 })]);
    }

    #[test]
    fn test_fields_become_params_in_order() {
        let task = build(
            InboundRequest::new("POST", "/x/greet?lang=en")
                .with_body(r#"{"zeta":1,"command":"hi","alpha":[2]}"#),
        );
        assert_eq!(task.command, "hi");
        assert_eq!(
            task.params,
            vec![json!("u1"), json!(1), json!([2]), json!("en")]
        );
    }

    #[test]
    fn test_command_from_path_and_default() {
        let task = build(InboundRequest::new("GET", "/x/items/list/?page=2"));
        assert_eq!(task.command, "list");
        assert_eq!(task.params, vec![json!("u1"), json!("2")]);

        let root = build(InboundRequest::new("GET", "/"));
        assert_eq!(root.command, DEFAULT_COMMAND);
        assert_eq!(root.params, vec![json!("u1")]);
    }

    #[test]
    fn test_non_json_body() {
        let task = build(InboundRequest::new("POST", "/x/raw").with_body("plain text"));
        assert_eq!(task.command, "raw");
        assert_eq!(task.params, vec![json!("u1"), json!("plain text")]);

        let scalar = build(InboundRequest::new("POST", "/x/raw").with_body("42"));
        assert_eq!(scalar.params, vec![json!("u1"), json!(42)]);
    }

    #[tokio::test]
    async fn test_execute_roundtrip() {
        let orchestrator = orchestrator();
        let deployment = deployment();
        let mailbox = orchestrator
            .mailboxes()
            .get_or_open(&deployment.key())
            .await
            .unwrap();

        let worker = tokio::spawn(async move {
            loop {
                if let Some(task) = mailbox.dequeue().await.unwrap() {
                    let echoed = task.params[1].clone();
                    mailbox
                        .mark_complete(&task.id, json!({ "echo": echoed }))
                        .await
                        .unwrap();
                    return task;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        });

        let request = InboundRequest::new("POST", "/x")
            .with_body(r#"{"command":"echo","params":["hello"]}"#);
        let response = orchestrator
            .handle(
                &deployment,
                &request,
                &SecurityContext::authenticated("u1"),
                Some(Duration::from_secs(5)),
            )
            .await;

        assert_eq!(response, TaskResponse::success(json!({ "echo": "hello" })));
        let task = worker.await.unwrap();
        assert_eq!(task.params, vec![json!("u1"), json!("hello")]);
    }

    #[tokio::test]
    async fn test_executor_error_passthrough() {
        let orchestrator = orchestrator();
        let deployment = deployment();
        let mailbox = orchestrator
            .mailboxes()
            .get_or_open(&deployment.key())
            .await
            .unwrap();

        tokio::spawn(async move {
            loop {
                if let Some(task) = mailbox.dequeue().await.unwrap() {
                    mailbox
                        .mark_error(&task.id, TaskFailure::new("no such command", "NOT_FOUND"))
                        .await
                        .unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        });

        let response = orchestrator
            .handle(
                &deployment,
                &InboundRequest::new("GET", "/x/missing"),
                &SecurityContext::anonymous(),
                Some(Duration::from_secs(5)),
            )
            .await;
        assert_eq!(response.error_code(), Some("NOT_FOUND"));
        assert_eq!(response.http_status(), 404);
    }

    #[tokio::test]
    async fn test_timeout_cancels_pending_task() {
        let orchestrator = orchestrator();
        let deployment = deployment();
        let task = orchestrator.create_task(
            &deployment,
            &InboundRequest::new("GET", "/x/slow"),
            &SecurityContext::anonymous(),
            &[],
        );
        let id = task.id.clone();

        let response = orchestrator
            .execute_task(task, Some(Duration::from_millis(20)))
            .await;
        assert_eq!(response.error_code(), Some("TIMEOUT"));

        let mailbox = orchestrator
            .mailboxes()
            .get_or_open(&deployment.key())
            .await
            .unwrap();
        assert!(mailbox.is_cancelled(&id).await.unwrap());
        assert!(mailbox.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_failure_code() {
        let dir = TempDir::new().unwrap();
        let paths = BerthPaths::new(dir.path());
        let orchestrator = TaskOrchestrator::new(
            Arc::new(MailboxRegistry::new(Arc::new(DirMailboxFactory::new(
                paths.clone(),
            )))),
            OrchestratorConfig::default(),
        );
        let deployment = deployment();
        orchestrator
            .mailboxes()
            .get_or_open(&deployment.key())
            .await
            .unwrap();

        // Replace the request bucket with a plain file
        let requests = paths.mailbox_dir(&deployment.key()).join(REQUESTS_DIR);
        std::fs::remove_dir_all(&requests).unwrap();
        std::fs::write(&requests, b"").unwrap();

        let response = orchestrator
            .handle(
                &deployment,
                &InboundRequest::new("GET", "/x/a"),
                &SecurityContext::anonymous(),
                Some(Duration::from_millis(50)),
            )
            .await;
        assert_eq!(response.error_code(), Some("TASK_ENQUEUE_ERROR"));
        assert_eq!(response.http_status(), 500);
    }
}
