//! Config - `config.json` and runtime settings
//!
//! - `settings.rs` - runtime, timeouts, supervisor policy
//! - `store.rs` - `config.json` (domains, repositories, deployments, settings)

mod settings;
mod store;

pub use settings::{BackoffKind, Settings, SupervisorSettings};
pub use store::{BerthConfig, ConfigStore, RepositoryConfig, CONFIG_FILE};
