//! Deployment Registry
//!
//! In-memory map of deployments keyed by (domain, path), mirrored to the
//! configuration store. Owns the on-disk deployment tree:
//!
//! ```text
//! <home>/deployments/<slug>/
//! ├── code/            checkout (mounted at /app)
//! ├── mailbox/         task mailbox (mounted at /berth/mailbox)
//! └── manifest.json
//! ```
//!
//! Mutating operations are serialized by an operation lock; reads only take
//! the map's read lock.

use super::manifest::Manifest;
use super::sync::CodeSync;
use crate::container::ContainerManager;
use berth_foundation::{
    BerthPaths, ConfigStore, Deployment, DeploymentKey, Error, Result, DEFAULT_BRANCH,
};
use berth_task::{DirMailbox, MailboxRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

// ============================================================================
// Inputs
// ============================================================================

/// Input to `deploy_agent`; unset fields take the deployment defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployConfig {
    pub agent: String,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub sub_path: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl DeployConfig {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            ..Default::default()
        }
    }

    fn into_deployment(self, key: &DeploymentKey) -> Deployment {
        let mut deployment = Deployment::new(key, self.agent);
        deployment.repository = self.repository.filter(|r| !r.trim().is_empty());
        deployment.branch = self
            .branch
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
        deployment.sub_path = self.sub_path;
        if let Some(image) = self.image.filter(|i| !i.trim().is_empty()) {
            deployment.image = image;
        }
        deployment.command = self.command;
        deployment.environment = self.environment;
        deployment.enabled = self.enabled.unwrap_or(true);
        deployment
    }
}

/// Partial update merged into an existing deployment
///
/// `environment` replaces the whole map when set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentUpdate {
    pub agent: Option<String>,
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub sub_path: Option<String>,
    pub image: Option<String>,
    pub command: Option<String>,
    pub environment: Option<BTreeMap<String, String>>,
    pub enabled: Option<bool>,
}

impl DeploymentUpdate {
    fn apply(&self, deployment: &mut Deployment) {
        if let Some(agent) = &self.agent {
            deployment.agent = agent.clone();
        }
        if let Some(repository) = &self.repository {
            deployment.repository = Some(repository.clone()).filter(|r| !r.trim().is_empty());
        }
        if let Some(branch) = &self.branch {
            deployment.branch = branch.clone();
        }
        if let Some(sub_path) = &self.sub_path {
            deployment.sub_path = Some(sub_path.clone()).filter(|s| !s.trim().is_empty());
        }
        if let Some(image) = &self.image {
            deployment.image = image.clone();
        }
        if let Some(command) = &self.command {
            deployment.command = Some(command.clone()).filter(|c| !c.trim().is_empty());
        }
        if let Some(environment) = &self.environment {
            deployment.environment = environment.clone();
        }
        if let Some(enabled) = self.enabled {
            deployment.enabled = enabled;
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

pub struct DeploymentRegistry {
    paths: BerthPaths,
    config: ConfigStore,
    containers: Arc<ContainerManager>,
    sync: Arc<dyn CodeSync>,
    mailboxes: Option<Arc<MailboxRegistry>>,
    deployments: RwLock<BTreeMap<DeploymentKey, Deployment>>,
    op_lock: Mutex<()>,
}

impl DeploymentRegistry {
    pub fn new(paths: BerthPaths, containers: Arc<ContainerManager>, sync: Arc<dyn CodeSync>) -> Self {
        Self {
            config: ConfigStore::new(paths.store()),
            paths,
            containers,
            sync,
            mailboxes: None,
            deployments: RwLock::new(BTreeMap::new()),
            op_lock: Mutex::new(()),
        }
    }

    /// Evict a removed deployment's mailbox from this registry
    pub fn with_mailboxes(mut self, mailboxes: Arc<MailboxRegistry>) -> Self {
        self.mailboxes = Some(mailboxes);
        self
    }

    pub fn paths(&self) -> &BerthPaths {
        &self.paths
    }

    pub fn containers(&self) -> &Arc<ContainerManager> {
        &self.containers
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config
    }

    /// Rehydrate the map from the configuration store
    pub async fn load(&self) -> Result<usize> {
        let config = self.config.load()?;
        let loaded: BTreeMap<DeploymentKey, Deployment> = config
            .deployments
            .into_iter()
            .map(|d| (d.key(), d))
            .collect();
        let count = loaded.len();
        *self.deployments.write().await = loaded;
        info!(count, "Loaded deployments");
        Ok(count)
    }

    pub async fn get(&self, key: &DeploymentKey) -> Option<Deployment> {
        self.deployments.read().await.get(key).cloned()
    }

    pub async fn list(&self) -> Vec<Deployment> {
        self.deployments.read().await.values().cloned().collect()
    }

    pub async fn snapshot(&self) -> BTreeMap<DeploymentKey, Deployment> {
        self.deployments.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.deployments.read().await.len()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    pub async fn deploy_agent(
        &self,
        domain: &str,
        path: &str,
        config: DeployConfig,
    ) -> Result<Deployment> {
        let _guard = self.op_lock.lock().await;
        let key = DeploymentKey::new(domain, path);

        if key.domain.is_empty() {
            return Err(Error::InvalidInput("Domain must not be empty".to_string()));
        }
        if config.agent.trim().is_empty() {
            return Err(Error::InvalidInput("Agent name must not be empty".to_string()));
        }
        {
            let deployments = self.deployments.read().await;
            if deployments.contains_key(&key) {
                return Err(Error::DeploymentExists(key.to_string()));
            }
            let slug = key.slug();
            if let Some(holder) = deployments.keys().find(|k| k.slug() == slug) {
                return Err(Error::DeploymentExists(format!(
                    "{} (name {} is held by {})",
                    key, slug, holder
                )));
            }
        }

        let mut deployment = config.into_deployment(&key);
        if let Err(e) = self.prepare_deployment(&deployment).await {
            self.discard(&key).await;
            return Err(e);
        }

        if deployment.enabled {
            match self.containers.ensure_container(&deployment).await {
                Ok(name) => deployment.container_name = Some(name),
                Err(e) => {
                    self.discard(&key).await;
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.config.persist_deployment(&deployment) {
            self.discard(&key).await;
            return Err(e);
        }
        self.deployments
            .write()
            .await
            .insert(key.clone(), deployment.clone());

        info!(
            deployment = %key,
            agent = %deployment.agent,
            container = deployment.container_name.as_deref().unwrap_or("-"),
            "Deployed agent"
        );
        Ok(deployment)
    }

    pub async fn update_deployment(
        &self,
        domain: &str,
        path: &str,
        updates: DeploymentUpdate,
    ) -> Result<Deployment> {
        let _guard = self.op_lock.lock().await;
        let key = DeploymentKey::new(domain, path);
        let current = self.require(&key).await?;

        let mut updated = current.clone();
        updates.apply(&mut updated);
        updated.touch();

        if updated.source_differs(&current) {
            self.prepare_tree(&updated).await?;
        }

        if !updated.enabled {
            if let Some(name) = current.container_name.as_deref() {
                self.containers.remove_container(name).await?;
            }
            updated.container_name = None;
        } else if current.container_name.is_some() {
            let before = self.containers.container_config(&current)?;
            let after = self.containers.container_config(&updated)?;
            let name = if before != after {
                self.containers.recreate_container(&updated).await?
            } else {
                self.refresh_container(&updated, current.container_name.as_deref())
                    .await?
            };
            updated.container_name = Some(name);
        } else {
            updated.container_name = Some(self.containers.ensure_container(&updated).await?);
        }

        // manifest only after the container step succeeded
        self.write_manifest(&updated)?;
        self.config.persist_deployment(&updated)?;
        self.deployments
            .write()
            .await
            .insert(key.clone(), updated.clone());

        info!(deployment = %key, "Updated deployment");
        Ok(updated)
    }

    /// Tear down container, on-disk state and the record
    pub async fn remove_deployment(&self, domain: &str, path: &str) -> Result<Deployment> {
        let _guard = self.op_lock.lock().await;
        let key = DeploymentKey::new(domain, path);
        let current = self.require(&key).await?;

        let name = current
            .container_name
            .clone()
            .unwrap_or_else(|| crate::container::container_name(&key));
        self.containers.remove_container(&name).await?;

        remove_tree(&self.paths.deployment_dir(&key)).await?;

        self.deployments.write().await.remove(&key);
        self.config.forget_deployment(&key)?;

        if let Some(mailboxes) = &self.mailboxes {
            mailboxes.evict(&key).await;
        }

        info!(deployment = %key, container = %name, "Removed deployment");
        Ok(current)
    }

    /// Re-pull code (if any) and restart the container
    pub async fn sync_deployment(&self, domain: &str, path: &str) -> Result<Deployment> {
        let _guard = self.op_lock.lock().await;
        let key = DeploymentKey::new(domain, path);
        let mut deployment = self.require(&key).await?;

        if let Some(repository) = deployment.repository.as_deref() {
            self.sync
                .sync(repository, &deployment.branch, &self.paths.code_dir(&key))
                .await?;
        } else {
            debug!(deployment = %key, "No repository configured, skipping code sync");
        }
        deployment.touch();
        self.write_manifest(&deployment)?;

        if deployment.enabled {
            let name = self
                .refresh_container(&deployment, deployment.container_name.as_deref())
                .await?;
            deployment.container_name = Some(name);
        }

        self.config.persist_deployment(&deployment)?;
        self.deployments
            .write()
            .await
            .insert(key.clone(), deployment.clone());

        info!(deployment = %key, "Synced deployment");
        Ok(deployment)
    }

    /// Directory skeleton, optional code sync, manifest
    pub async fn prepare_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.prepare_tree(deployment).await?;
        self.write_manifest(deployment)
    }

    async fn prepare_tree(&self, deployment: &Deployment) -> Result<()> {
        let key = deployment.key();
        let code_dir = self.paths.code_dir(&key);

        tokio::fs::create_dir_all(self.paths.runtime_dir()).await?;
        tokio::fs::create_dir_all(&code_dir).await?;
        // Bucket layout shared with the container
        DirMailbox::open(key.clone(), self.paths.mailbox_dir(&key))?;

        if let Some(repository) = deployment.repository.as_deref() {
            info!(
                deployment = %key,
                repository,
                branch = %deployment.branch,
                sync = self.sync.name(),
                "Syncing code"
            );
            self.sync
                .sync(repository, &deployment.branch, &code_dir)
                .await?;
        }
        Ok(())
    }

    /// Restart the recorded container if it is running, otherwise ensure one
    async fn refresh_container(
        &self,
        deployment: &Deployment,
        recorded: Option<&str>,
    ) -> Result<String> {
        if let Some(name) = recorded {
            if self.containers.is_running(name).await? {
                self.containers.restart_container(name).await?;
                return Ok(name.to_string());
            }
            debug!(deployment = %deployment.key(), container = name, "Recorded container is gone");
        }
        self.containers.ensure_container(deployment).await
    }

    fn write_manifest(&self, deployment: &Deployment) -> Result<()> {
        Manifest::from_deployment(deployment).save(&self.paths.manifest_path(&deployment.key()))
    }

    async fn require(&self, key: &DeploymentKey) -> Result<Deployment> {
        self.get(key)
            .await
            .ok_or_else(|| Error::DeploymentNotFound(key.to_string()))
    }

    /// Roll back a deploy that failed half-way
    async fn discard(&self, key: &DeploymentKey) {
        if let Err(e) = self
            .containers
            .remove_container(&crate::container::container_name(key))
            .await
        {
            warn!(deployment = %key, "Rollback: container removal failed: {}", e);
        }
        if let Err(e) = remove_tree(&self.paths.deployment_dir(key)).await {
            warn!(deployment = %key, "Rollback: directory removal failed: {}", e);
        }
    }
}

async fn remove_tree(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
