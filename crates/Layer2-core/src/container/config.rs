//! Container specification for a deployment

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Bind mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Host path
    pub host_path: PathBuf,
    /// Container path
    pub container_path: PathBuf,
    /// Read-only mount
    pub read_only: bool,
}

impl VolumeMount {
    pub fn new(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host.into(),
            container_path: container.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// `host:container[:ro]`
    pub fn to_arg(&self) -> String {
        let ro = if self.read_only { ":ro" } else { "" };
        format!(
            "{}:{}{}",
            self.host_path.to_string_lossy(),
            self.container_path.to_string_lossy(),
            ro
        )
    }
}

/// Everything needed to create a deployment's container
///
/// Pure function of the deployment and the home layout, so computing it twice
/// yields the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Deterministic container name
    pub name: String,
    pub image: String,
    pub volumes: Vec<VolumeMount>,
    pub environment: BTreeMap<String, String>,
    pub workdir: PathBuf,
    /// Start command (argv)
    pub command: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            volumes: Vec::new(),
            environment: BTreeMap::new(),
            workdir: PathBuf::from("/"),
            command: Vec::new(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_volume(mut self, mount: VolumeMount) -> Self {
        self.volumes.push(mount);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = dir.into();
        self
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Same spec with another image reference
    pub fn with_image(&self, image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..self.clone()
        }
    }

    /// Arguments following `<runtime> run`
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec!["-d".to_string()];

        // Name
        args.push("--name".to_string());
        args.push(self.name.clone());

        // Working directory
        args.push("-w".to_string());
        args.push(self.workdir.to_string_lossy().to_string());

        // Environment
        for (key, value) in &self.environment {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        // Volumes
        for vol in &self.volumes {
            args.push("-v".to_string());
            args.push(vol.to_arg());
        }

        // Labels
        for (key, value) in &self.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }

        // Image
        args.push(self.image.clone());

        // Command
        args.extend(self.command.iter().cloned());

        args
    }
}

/// Fully qualified form of an image reference, if it is not one already
///
/// `node:20` → `docker.io/library/node:20`, `acme/app` → `docker.io/acme/app`.
/// References whose first component looks like a registry host (contains `.`
/// or `:`, or is `localhost`) are returned as `None`.
pub fn qualify_image(image: &str) -> Option<String> {
    match image.split_once('/') {
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            None
        }
        Some(_) => Some(format!("docker.io/{}", image)),
        None => Some(format!("docker.io/library/{}", image)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let spec = ContainerSpec::new("berth-host-x", "node:20-slim")
            .with_workdir("/app")
            .with_env("BERTH_AGENT", "demo")
            .with_volume(VolumeMount::new("/srv/code", "/app"))
            .with_volume(VolumeMount::new("/srv/runtime", "/berth/runtime").read_only())
            .with_command(vec!["node".into(), "index.js".into()]);

        let args = spec.run_args();
        assert_eq!(&args[..3], &["-d", "--name", "berth-host-x"]);
        assert!(args.windows(2).any(|w| w == ["-w", "/app"]));
        assert!(args.windows(2).any(|w| w == ["-e", "BERTH_AGENT=demo"]));
        assert!(args.windows(2).any(|w| w == ["-v", "/srv/code:/app"]));
        assert!(args
            .windows(2)
            .any(|w| w == ["-v", "/srv/runtime:/berth/runtime:ro"]));
        assert_eq!(&args[args.len() - 3..], &["node:20-slim", "node", "index.js"]);
    }

    #[test]
    fn test_qualify_image() {
        assert_eq!(
            qualify_image("node:20-slim").as_deref(),
            Some("docker.io/library/node:20-slim")
        );
        assert_eq!(
            qualify_image("acme/agent").as_deref(),
            Some("docker.io/acme/agent")
        );
        assert_eq!(qualify_image("ghcr.io/acme/agent"), None);
        assert_eq!(qualify_image("localhost:5000/agent"), None);
        assert_eq!(qualify_image("localhost/agent"), None);
    }
}
