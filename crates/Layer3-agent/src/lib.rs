//! # berth-agent
//!
//! Agent supervision for Berth. Keeps each deployment's container alive.
//!
//! ## Components
//!
//! - **Supervisor**: tracked agents, start/stop/restart
//! - **Actor**: one task per agent, owns health checks and the restart counter
//! - **Backoff**: linear or exponential restart delay (capped at 5 minutes)
//!
//! ## State transitions
//!
//! ```text
//! Stopped → Starting → Running → Unhealthy → Restarting → Running
//!                                     └─ (retries exhausted) → Stopped
//! ```

pub mod supervisor;

pub use supervisor::{
    AgentEvent, AgentEventKind, AgentState, AgentStatus, Supervisor, SupervisorConfig,
    MAX_BACKOFF,
};
