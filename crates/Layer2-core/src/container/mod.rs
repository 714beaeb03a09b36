//! Container lifecycle
//!
//! - `config`: per-deployment container spec and runtime arguments
//! - `runtime`: runtime trait, Docker/Podman CLI implementation
//! - `memory`: in-process runtime (tests, dry runs)
//! - `manager`: idempotent ensure/restart/remove on top of a runtime

mod config;
mod manager;
mod memory;
mod runtime;

pub use config::{qualify_image, ContainerSpec, VolumeMount};
pub use manager::{container_name, ContainerManager};
pub use memory::MemoryRuntime;
pub use runtime::{CliRuntime, ContainerRuntime, ContainerStatus, RuntimeKind};

/// Prefix of every deployment container name
pub const CONTAINER_PREFIX: &str = "berth-";

/// Code mount point and working directory
pub const APP_DIR: &str = "/app";

/// Shared runtime support directory (read-only)
pub const RUNTIME_MOUNT: &str = "/berth/runtime";

/// Mailbox mount point, also exported as `BERTH_MAILBOX`
pub const MAILBOX_MOUNT: &str = "/berth/mailbox";

/// Start command when a deployment has none
pub const DEFAULT_ENTRYPOINT: &str = "/berth/runtime/entrypoint";
