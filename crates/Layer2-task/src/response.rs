//! Task results as returned to callers and as recorded in the mailbox

use crate::task::TaskId;
use berth_foundation::ErrorCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{ "message": ..., "code": ... }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
}

/// Caller-facing result of a task
///
/// Serializes as `{ "success": true, "data": ... }` or
/// `{ "success": false, "error": { "message": ..., "code": ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl TaskResponse {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                message: message.into(),
                code: code.into(),
            }),
        }
    }

    pub fn from_code(message: impl Into<String>, code: ErrorCode) -> Self {
        Self::failure(message, code.as_str())
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }

    /// 200 on success, 404 for not-found codes, 500 otherwise
    pub fn http_status(&self) -> u16 {
        if self.success {
            return 200;
        }
        self.error_code()
            .and_then(ErrorCode::parse)
            .map(|code| code.http_status())
            .unwrap_or(500)
    }
}

// ============================================================================
// Mailbox records
// ============================================================================

/// Error payload written by an executor on failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub message: String,
    pub code: String,
    #[serde(default)]
    pub details: Value,
}

impl TaskFailure {
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// `responses/<id>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    pub id: TaskId,
    pub response: Value,
    pub completed_at: DateTime<Utc>,
}

/// `errors/<id>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub id: TaskId,
    pub error: TaskFailure,
    pub failed_at: DateTime<Utc>,
}

/// Terminal outcome observed by a poller
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(Value),
    Failed(TaskFailure),
    Cancelled,
}

impl TaskOutcome {
    pub fn into_response(self) -> TaskResponse {
        match self {
            TaskOutcome::Completed(data) => TaskResponse::success(data),
            TaskOutcome::Failed(failure) => TaskResponse::failure(failure.message, failure.code),
            TaskOutcome::Cancelled => {
                TaskResponse::from_code("Task was cancelled", ErrorCode::Cancelled)
            }
        }
    }
}
