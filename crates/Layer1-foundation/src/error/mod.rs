//! Error types for Berth
//!
//! One error enum for every crate, mapped to caller-visible error codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// ErrorCode - codes exposed over HTTP and the task protocol
// ============================================================================

/// Caller-visible error code carried in `{ "error": { "code": ... } }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    TaskExecutionError,
    TaskEnqueueError,
    Cancelled,
    Timeout,
    DeploymentExists,
    DeploymentNotFound,
    ContainerError,
    NotFound,
    InvalidInput,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskExecutionError => "TASK_EXECUTION_ERROR",
            Self::TaskEnqueueError => "TASK_ENQUEUE_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Timeout => "TIMEOUT",
            Self::DeploymentExists => "DEPLOYMENT_EXISTS",
            Self::DeploymentNotFound => "DEPLOYMENT_NOT_FOUND",
            Self::ContainerError => "CONTAINER_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidInput => "INVALID_INPUT",
        }
    }

    /// `None` for unknown codes
    pub fn parse(code: &str) -> Option<Self> {
        let code = match code {
            "TASK_EXECUTION_ERROR" => Self::TaskExecutionError,
            "TASK_ENQUEUE_ERROR" => Self::TaskEnqueueError,
            "CANCELLED" => Self::Cancelled,
            "TIMEOUT" => Self::Timeout,
            "DEPLOYMENT_EXISTS" => Self::DeploymentExists,
            "DEPLOYMENT_NOT_FOUND" => Self::DeploymentNotFound,
            "CONTAINER_ERROR" => Self::ContainerError,
            "NOT_FOUND" => Self::NotFound,
            "INVALID_INPUT" => Self::InvalidInput,
            _ => return None,
        };
        Some(code)
    }

    /// 404 for the not-found family, 500 otherwise
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound | Self::DeploymentNotFound => 404,
            _ => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Error
// ============================================================================

/// Berth error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Config / storage
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // Deployment
    // ========================================================================
    #[error("Deployment already exists: {0}")]
    DeploymentExists(String),

    #[error("Deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("Code sync failed: {0}")]
    Sync(String),

    // ========================================================================
    // Container
    // ========================================================================
    #[error("Container runtime not found")]
    RuntimeNotFound,

    #[error("Container error: {0}")]
    Container(String),

    // ========================================================================
    // Task / mailbox
    // ========================================================================
    #[error("Failed to enqueue task: {0}")]
    Enqueue(String),

    #[error("Mailbox error: {0}")]
    Mailbox(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // General
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // Conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Code reported to callers
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::DeploymentExists(_) => ErrorCode::DeploymentExists,
            Error::DeploymentNotFound(_) => ErrorCode::DeploymentNotFound,
            Error::RuntimeNotFound | Error::Container(_) => ErrorCode::ContainerError,
            Error::Enqueue(_) => ErrorCode::TaskEnqueueError,
            Error::Timeout(_) => ErrorCode::Timeout,
            Error::Cancelled => ErrorCode::Cancelled,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::InvalidInput(_) => ErrorCode::InvalidInput,
            _ => ErrorCode::TaskExecutionError,
        }
    }

    /// Whether retrying can help
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Io(_) | Error::Container(_))
    }

    /// Registry conflict (duplicate or missing deployment)
    pub fn is_registry_conflict(&self) -> bool {
        matches!(
            self,
            Error::DeploymentExists(_) | Error::DeploymentNotFound(_)
        )
    }

    pub fn container(message: impl Into<String>) -> Self {
        Error::Container(message.into())
    }

    pub fn mailbox(message: impl Into<String>) -> Self {
        Error::Mailbox(message.into())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
