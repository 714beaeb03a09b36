//! Container Lifecycle Manager
//!
//! Idempotent lifecycle operations for deployment containers:
//!
//! ```text
//! ensure_container
//!   ├─ running          → name (nothing to do)
//!   ├─ exists, stopped  → remove, then create
//!   └─ missing          → create (retry once with a qualified image)
//! ```

use super::config::qualify_image;
use super::{
    ContainerRuntime, ContainerSpec, VolumeMount, APP_DIR, CONTAINER_PREFIX, DEFAULT_ENTRYPOINT,
    MAILBOX_MOUNT, RUNTIME_MOUNT,
};
use berth_foundation::{BerthPaths, Deployment, DeploymentKey, Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Deterministic container name for a deployment identity
pub fn container_name(key: &DeploymentKey) -> String {
    format!("{}{}", CONTAINER_PREFIX, key.slug())
}

pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    paths: BerthPaths,
    /// Every container this manager ensured (for `stop_all`)
    tracked: Mutex<BTreeSet<String>>,
}

impl ContainerManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, paths: BerthPaths) -> Self {
        Self {
            runtime,
            paths,
            tracked: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn paths(&self) -> &BerthPaths {
        &self.paths
    }

    /// Container configuration for `deployment` (no I/O)
    pub fn container_config(&self, deployment: &Deployment) -> Result<ContainerSpec> {
        let key = deployment.key();

        let mut code_dir = self.paths.code_dir(&key);
        if let Some(sub_path) = deployment.sub_path.as_deref() {
            let sub_path = sub_path.trim_matches('/');
            if !sub_path.is_empty() {
                code_dir = code_dir.join(sub_path);
            }
        }

        let command = match deployment.command.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => shlex::split(raw).ok_or_else(|| {
                Error::InvalidInput(format!("Unbalanced quoting in command: {}", raw))
            })?,
            _ => vec![DEFAULT_ENTRYPOINT.to_string()],
        };

        let mut spec = ContainerSpec::new(container_name(&key), deployment.image.clone())
            .with_workdir(APP_DIR)
            .with_volume(VolumeMount::new(code_dir, APP_DIR))
            .with_volume(VolumeMount::new(self.paths.runtime_dir(), RUNTIME_MOUNT).read_only())
            .with_volume(VolumeMount::new(self.paths.mailbox_dir(&key), MAILBOX_MOUNT))
            .with_command(command)
            .with_label("berth.domain", &key.domain)
            .with_label("berth.path", &key.path)
            .with_label("berth.agent", &deployment.agent);

        for (name, value) in &deployment.environment {
            spec = spec.with_env(name, value);
        }
        Ok(spec
            .with_env("BERTH_AGENT", &deployment.agent)
            .with_env("BERTH_DOMAIN", &key.domain)
            .with_env("BERTH_PATH", &key.path)
            .with_env("BERTH_MAILBOX", MAILBOX_MOUNT))
    }

    /// Make sure the deployment's container is running; returns its name
    pub async fn ensure_container(&self, deployment: &Deployment) -> Result<String> {
        let spec = self.container_config(deployment)?;

        match self.runtime.inspect(&spec.name).await? {
            Some(status) if status.running => {
                debug!(container = %spec.name, "Container already running");
                self.track(&spec.name);
                return Ok(spec.name);
            }
            Some(_) => {
                info!(container = %spec.name, "Removing stopped container before recreate");
                self.runtime.remove(&spec.name).await?;
            }
            None => {}
        }

        self.create(&spec).await?;
        self.track(&spec.name);
        info!(
            container = %spec.name,
            deployment = %deployment.key(),
            runtime = self.runtime.name(),
            "Container ensured"
        );
        Ok(spec.name)
    }

    /// Remove and create again (picks up image/command/environment changes)
    pub async fn recreate_container(&self, deployment: &Deployment) -> Result<String> {
        self.remove_container(&container_name(&deployment.key())).await?;
        self.ensure_container(deployment).await
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<()> {
        let first = match self.runtime.create(spec).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        let Some(qualified) = qualify_image(&spec.image) else {
            return Err(first);
        };

        warn!(
            container = %spec.name,
            image = %spec.image,
            qualified = %qualified,
            "Container creation failed, retrying with qualified image: {}",
            first
        );
        // A half-created container would make the retry collide on the name.
        self.runtime.remove(&spec.name).await?;
        self.runtime
            .create(&spec.with_image(&qualified))
            .await
            .map_err(|retry| {
                Error::container(format!(
                    "Failed to create {} from {} or {}: {}",
                    spec.name, spec.image, qualified, retry
                ))
            })
    }

    pub async fn start_container(&self, name: &str) -> Result<()> {
        self.runtime.start(name).await
    }

    pub async fn stop_container(&self, name: &str) -> Result<()> {
        self.runtime.stop(name).await
    }

    pub async fn restart_container(&self, name: &str) -> Result<()> {
        self.runtime.restart(name).await
    }

    /// Stop then remove; absent containers are fine
    pub async fn remove_container(&self, name: &str) -> Result<()> {
        self.runtime.stop(name).await?;
        self.runtime.remove(name).await?;
        self.tracked.lock().remove(name);
        Ok(())
    }

    pub async fn is_running(&self, name: &str) -> Result<bool> {
        Ok(self
            .runtime
            .inspect(name)
            .await?
            .map(|status| status.running)
            .unwrap_or(false))
    }

    /// Best-effort removal of every tracked container (shutdown)
    pub async fn stop_all(&self) {
        let names: Vec<String> = std::mem::take(&mut *self.tracked.lock())
            .into_iter()
            .collect();
        for name in names {
            if let Err(e) = self.remove_container(&name).await {
                warn!(container = %name, "Failed to remove container: {}", e);
            }
        }
    }

    pub fn tracked(&self) -> Vec<String> {
        self.tracked.lock().iter().cloned().collect()
    }

    fn track(&self, name: &str) {
        self.tracked.lock().insert(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::MemoryRuntime;
    use std::path::PathBuf;

    fn setup() -> (Arc<MemoryRuntime>, ContainerManager) {
        let runtime = Arc::new(MemoryRuntime::new());
        let manager = ContainerManager::new(runtime.clone(), BerthPaths::new("/srv/berth"));
        (runtime, manager)
    }

    fn deployment() -> Deployment {
        Deployment::new(&DeploymentKey::new("Example.com", "/api/v1"), "demo")
    }

    #[test]
    fn test_container_config() {
        let (_, manager) = setup();
        let mut deployment = deployment();
        deployment.sub_path = Some("/agents/demo/".into());
        deployment.command = Some("node 'server main.js'".into());
        deployment.environment.insert("MODE".into(), "prod".into());

        let spec = manager.container_config(&deployment).unwrap();
        assert_eq!(spec.name, "berth-example.com-api-v1-b3bb5815");
        assert_eq!(spec.workdir, PathBuf::from("/app"));
        assert_eq!(spec.command, vec!["node", "server main.js"]);
        assert_eq!(spec.volumes.len(), 3);
        assert_eq!(
            spec.volumes[0].host_path,
            PathBuf::from("/srv/berth/deployments/example.com-api-v1-b3bb5815/code/agents/demo")
        );
        assert!(spec.volumes[1].read_only);
        assert_eq!(spec.volumes[2].container_path, PathBuf::from(MAILBOX_MOUNT));
        assert_eq!(spec.environment["MODE"], "prod");
        assert_eq!(spec.environment["BERTH_PATH"], "/api/v1");

        // Deterministic
        assert_eq!(manager.container_config(&deployment).unwrap(), spec);
    }

    #[test]
    fn test_default_entrypoint() {
        let (_, manager) = setup();
        let spec = manager.container_config(&deployment()).unwrap();
        assert_eq!(spec.command, vec![DEFAULT_ENTRYPOINT]);

        let mut broken = deployment();
        broken.command = Some("node 'unterminated".into());
        assert!(manager.container_config(&broken).is_err());
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let (runtime, manager) = setup();
        let deployment = deployment();

        let first = manager.ensure_container(&deployment).await.unwrap();
        let second = manager.ensure_container(&deployment).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(runtime.creations(), 1);
        assert_eq!(manager.tracked(), vec![first]);
    }

    #[tokio::test]
    async fn test_ensure_replaces_stopped_container() {
        let (runtime, manager) = setup();
        let deployment = deployment();

        let name = manager.ensure_container(&deployment).await.unwrap();
        runtime.crash(&name);
        assert!(!manager.is_running(&name).await.unwrap());

        manager.ensure_container(&deployment).await.unwrap();
        assert_eq!(runtime.creations(), 2);
        assert!(manager.is_running(&name).await.unwrap());
    }

    #[tokio::test]
    async fn test_image_qualification_retry() {
        let (runtime, manager) = setup();
        runtime.reject_image("node:20-slim");

        let name = manager.ensure_container(&deployment()).await.unwrap();
        assert_eq!(
            runtime.spec(&name).unwrap().image,
            "docker.io/library/node:20-slim"
        );

        // Already qualified: no second attempt
        let mut qualified = deployment();
        qualified.path = "/other".into();
        qualified.image = "ghcr.io/acme/agent".into();
        runtime.reject_image("ghcr.io/acme/agent");
        assert!(manager.ensure_container(&qualified).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent_and_stop_all() {
        let (runtime, manager) = setup();
        let a = manager.ensure_container(&deployment()).await.unwrap();
        let mut other = deployment();
        other.path = "/b".into();
        manager.ensure_container(&other).await.unwrap();

        manager.remove_container(&a).await.unwrap();
        manager.remove_container(&a).await.unwrap();
        assert_eq!(runtime.container_names().len(), 1);

        manager.stop_all().await;
        assert!(runtime.container_names().is_empty());
        assert!(manager.tracked().is_empty());
    }
}
