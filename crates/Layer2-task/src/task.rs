//! Task definition and types

use berth_foundation::{DeploymentKey, Error, Result, SecurityContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Ids per millisecond before the clock part is bumped
const SEQUENCE_SPAN: u64 = 1_000_000;

/// Last issued `(millis, sequence)`
static CLOCK: Mutex<(u64, u64)> = parking_lot::const_mutex((0, 0));

/// Unique, lexicographically sortable task identifier
///
/// Format: `{unix_millis:013}-{sequence:06}-{random:08x}`. The millisecond
/// part never goes backwards within a process, so string order follows
/// creation order and the mailbox can dequeue oldest-first by sorting names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a new TaskId
    pub fn generate() -> Self {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let (millis, seq) = {
            let mut clock = CLOCK.lock();
            *clock = next_stamp(*clock, now);
            *clock
        };
        let suffix: u32 = rand::random();
        Self(format!("{:013}-{:06}-{:08x}", millis, seq, suffix))
    }

    /// Parse an id received from outside (CLI, executor records)
    ///
    /// Ids become file names, so only `[A-Za-z0-9_-]` is accepted.
    pub fn parse(raw: &str) -> Result<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= 128
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(Error::InvalidInput(format!("Invalid task id: {:?}", raw)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Sequence restarts each millisecond; a full millisecond borrows the next one
fn next_stamp((last_millis, last_seq): (u64, u64), now: u64) -> (u64, u64) {
    if now > last_millis {
        (now, 0)
    } else if last_seq + 1 < SEQUENCE_SPAN {
        (last_millis, last_seq + 1)
    } else {
        (last_millis + 1, 0)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Inbound Request
// ============================================================================

/// HTTP request as seen by the orchestrator, after resolution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundRequest {
    pub method: String,
    /// Path plus optional query string, e.g. `/api/echo?x=1`
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl InboundRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Path component without query string or fragment
    pub fn path(&self) -> &str {
        let end = self.url.find(&['?', '#'][..]).unwrap_or(self.url.len());
        &self.url[..end]
    }

    /// Decoded query pairs in order of appearance
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let Some(start) = self.url.find('?') else {
            return Vec::new();
        };
        let rest = &self.url[start + 1..];
        let query = rest.split('#').next().unwrap_or_default();
        url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }
}

// ============================================================================
// Task
// ============================================================================

/// Request metadata carried alongside every task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub security: SecurityContext,
}

impl Default for TaskMetadata {
    fn default() -> Self {
        Self {
            method: "INTERNAL".to_string(),
            url: String::new(),
            headers: BTreeMap::new(),
            timestamp: Utc::now(),
            security: SecurityContext::default(),
        }
    }
}

/// One unit of work submitted against a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub deployment: DeploymentKey,
    pub command: String,
    /// Positional parameters; the caller id is always first
    pub params: Vec<Value>,
    pub metadata: TaskMetadata,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        deployment: DeploymentKey,
        command: impl Into<String>,
        params: Vec<Value>,
        metadata: TaskMetadata,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            deployment,
            command: command.into(),
            params,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Caller id (first positional parameter)
    pub fn caller_id(&self) -> Option<&str> {
        self.params.first().and_then(Value::as_str)
    }
}
