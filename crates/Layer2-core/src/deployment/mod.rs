//! Deployments
//!
//! - `registry`: deploy/update/remove/sync and the in-memory map
//! - `manifest`: per-deployment configuration snapshot
//! - `sync`: code sync collaborator (git, noop)

mod manifest;
mod registry;
mod sync;

pub use manifest::Manifest;
pub use registry::{DeployConfig, DeploymentRegistry, DeploymentUpdate};
pub use sync::{CodeSync, GitSync, NoopSync};
