//! # berth-task
//!
//! Task protocol for Berth deployments.
//! Requests become tasks, tasks travel through a per-deployment mailbox, and
//! whatever runs inside the deployment's container answers them.
//!
//! ## Features
//!
//! - Sortable task ids (oldest-first dequeue)
//! - Mailbox protocol with directory and in-memory backends
//! - Exclusive claim via create-if-absent locks
//! - Cooperative cancellation markers
//! - **Orphan sweeping for results nobody polled**
//! - Request to task mapping and result normalization

pub mod mailbox;
pub mod orchestrator;
pub mod response;
pub mod state;
pub mod task;

// Task model
pub use state::EntryState;
pub use task::{InboundRequest, Task, TaskId, TaskMetadata};

// Results
pub use response::{
    CompletionRecord, ErrorBody, FailureRecord, TaskFailure, TaskOutcome, TaskResponse,
};

// Mailbox
pub use mailbox::{
    DirMailbox, DirMailboxFactory, MailboxFactory, MailboxRegistry, MailboxSweeper,
    MemoryMailbox, MemoryMailboxFactory, SweepReport, TaskMailbox, DEFAULT_ORPHAN_RETENTION,
    DEFAULT_POLL_INTERVAL,
};

// Orchestration
pub use orchestrator::{
    OrchestratorConfig, TaskOrchestrator, DEFAULT_COMMAND, DEFAULT_TASK_TIMEOUT,
};
