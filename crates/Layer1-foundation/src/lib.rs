//! # berth-foundation
//!
//! Foundation layer for Berth:
//! - Error: error type and caller-visible error codes
//! - Deployment: (domain, path) deployment record
//! - Config: `config.json` store
//! - Storage: JsonStore (atomic write)
//! - Paths: home directory layout
//! - Security: caller info handed over by an outer auth layer
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │  berth-cli                                             │
//! │     │                                                  │
//! │     ▼                                                  │
//! │  berth-agent (Supervisor)                              │
//! │     │                                                  │
//! │     ▼                                                  │
//! │  berth-core (Registry, Resolver, Containers)           │
//! │     │                                                  │
//! │     ▼                                                  │
//! │  berth-task (Mailbox, Orchestrator)                    │
//! │     │                                                  │
//! │     ▼                                                  │
//! │  berth-foundation                                      │
//! └───────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod deployment;
pub mod error;
pub mod paths;
pub mod security;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, ErrorCode, Result};

// ============================================================================
// Deployment
// ============================================================================
pub use deployment::{
    normalize_domain, normalize_path, Deployment, DeploymentKey, DEFAULT_BRANCH, DEFAULT_IMAGE,
};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    BackoffKind, BerthConfig, ConfigStore, RepositoryConfig, Settings, SupervisorSettings,
    CONFIG_FILE,
};

// ============================================================================
// Storage / Paths / Security
// ============================================================================
pub use paths::{BerthPaths, HOME_ENV, MANIFEST_FILE};
pub use security::{SecurityContext, ANONYMOUS_CALLER};
pub use storage::{write_atomic, JsonStore};
