//! Container runtime abstraction
//!
//! Deployment containers are driven through an external runtime CLI. Docker
//! and Podman accept the same flags for everything used here.

use super::ContainerSpec;
use async_trait::async_trait;
use berth_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use std::process::Output;
use std::str::FromStr;
use tracing::{debug, info};

/// Observed container state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    pub name: String,
    pub running: bool,
}

/// Runtime operations the lifecycle manager relies on
///
/// `stop` and `remove` on a missing container are not errors.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Runtime name (for logs)
    fn name(&self) -> &str;

    /// `None` when no container with that name exists
    async fn inspect(&self, name: &str) -> Result<Option<ContainerStatus>>;

    /// Create and start detached
    async fn create(&self, spec: &ContainerSpec) -> Result<()>;

    async fn start(&self, name: &str) -> Result<()>;

    async fn stop(&self, name: &str) -> Result<()>;

    async fn remove(&self, name: &str) -> Result<()>;

    async fn restart(&self, name: &str) -> Result<()>;
}

// ============================================================================
// Docker / Podman CLI
// ============================================================================

/// Container runtime type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Docker,
    Podman,
}

impl RuntimeKind {
    /// Get the CLI command for this runtime
    pub fn command(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }

    /// First runtime found on `PATH` (Docker preferred)
    pub fn detect() -> Option<Self> {
        [Self::Docker, Self::Podman]
            .into_iter()
            .find(|kind| which::which(kind.command()).is_ok())
    }
}

impl FromStr for RuntimeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            other => Err(Error::InvalidInput(format!(
                "Unknown container runtime: {}",
                other
            ))),
        }
    }
}

/// Docker/Podman runtime driven through `tokio::process`
pub struct CliRuntime {
    kind: RuntimeKind,
}

impl CliRuntime {
    pub fn new(kind: RuntimeKind) -> Self {
        Self { kind }
    }

    pub fn docker() -> Self {
        Self::new(RuntimeKind::Docker)
    }

    pub fn podman() -> Self {
        Self::new(RuntimeKind::Podman)
    }

    /// Detect available runtime
    pub fn detect() -> Result<Self> {
        RuntimeKind::detect()
            .map(Self::new)
            .ok_or(Error::RuntimeNotFound)
    }

    pub fn kind(&self) -> RuntimeKind {
        self.kind
    }

    async fn exec(&self, args: &[&str]) -> Result<Output> {
        debug!(runtime = self.kind.command(), ?args, "Invoking container runtime");
        tokio::process::Command::new(self.kind.command())
            .args(args)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::RuntimeNotFound
                } else {
                    Error::container(format!("{} {}: {}", self.kind.command(), args.join(" "), e))
                }
            })
    }

    /// Run and require success; `missing_ok` tolerates "no such container"
    async fn exec_checked(&self, args: &[&str], missing_ok: bool) -> Result<()> {
        let output = self.exec(args).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if missing_ok && is_missing(&stderr) {
            return Ok(());
        }
        Err(Error::container(format!(
            "{} {} failed: {}",
            self.kind.command(),
            args.first().copied().unwrap_or_default(),
            stderr
        )))
    }
}

fn is_missing(stderr: &str) -> bool {
    let lowered = stderr.to_ascii_lowercase();
    lowered.contains("no such container")
        || lowered.contains("no such object")
        || lowered.contains("no container with name")
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    fn name(&self) -> &str {
        self.kind.command()
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerStatus>> {
        let output = self
            .exec(&["inspect", "--type", "container", "--format", "{{.State.Running}}", name])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing(&stderr) {
                return Ok(None);
            }
            return Err(Error::container(format!(
                "inspect {} failed: {}",
                name,
                stderr.trim()
            )));
        }

        let running = String::from_utf8_lossy(&output.stdout).trim() == "true";
        Ok(Some(ContainerStatus {
            name: name.to_string(),
            running,
        }))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<()> {
        info!(
            container = %spec.name,
            image = %spec.image,
            "Creating container with {}",
            self.kind.command()
        );
        let mut args = vec!["run".to_string()];
        args.extend(spec.run_args());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.exec_checked(&args, false).await
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.exec_checked(&["start", name], false).await
    }

    async fn stop(&self, name: &str) -> Result<()> {
        info!(container = %name, "Stopping container");
        self.exec_checked(&["stop", name], true).await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        info!(container = %name, "Removing container");
        self.exec_checked(&["rm", "-f", name], true).await
    }

    async fn restart(&self, name: &str) -> Result<()> {
        info!(container = %name, "Restarting container");
        self.exec_checked(&["restart", name], false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_kind_parse() {
        assert_eq!("Docker".parse::<RuntimeKind>().unwrap(), RuntimeKind::Docker);
        assert_eq!("podman".parse::<RuntimeKind>().unwrap(), RuntimeKind::Podman);
        assert!("containerd".parse::<RuntimeKind>().is_err());
        assert_eq!(RuntimeKind::Podman.command(), "podman");
    }

    #[test]
    fn test_missing_detection() {
        assert!(is_missing("Error: No such container: berth-x"));
        assert!(is_missing("Error: no container with name or ID \"berth-x\" found"));
        assert!(!is_missing("permission denied"));
    }
}
