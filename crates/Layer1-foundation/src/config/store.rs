//! Config Store - `config.json` persistence
//!
//! Several worker processes share the file, so every change is a
//! load → modify → atomic save. There is no cross-process lock.

use super::Settings;
use crate::deployment::{Deployment, DeploymentKey};
use crate::storage::JsonStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Config file name
pub const CONFIG_FILE: &str = "config.json";

/// A code repository known to this installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Contents of `config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BerthConfig {
    /// Format version
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub domains: Vec<String>,

    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,

    #[serde(default)]
    pub deployments: Vec<Deployment>,

    #[serde(default)]
    pub settings: Settings,
}

fn default_version() -> u32 {
    1
}

impl Default for BerthConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            domains: Vec::new(),
            repositories: Vec::new(),
            deployments: Vec::new(),
            settings: Settings::default(),
        }
    }
}

impl BerthConfig {
    pub fn find_deployment(&self, key: &DeploymentKey) -> Option<&Deployment> {
        self.deployments.iter().find(|d| &d.key() == key)
    }

    /// Insert or replace by (domain, path); registers domain and repository
    pub fn upsert_deployment(&mut self, deployment: &Deployment) {
        let key = deployment.key();
        match self.deployments.iter_mut().find(|d| d.key() == key) {
            Some(existing) => *existing = deployment.clone(),
            None => self.deployments.push(deployment.clone()),
        }

        if !self.domains.iter().any(|d| d == &key.domain) {
            self.domains.push(key.domain.clone());
        }
        if let Some(url) = &deployment.repository {
            if !self.repositories.iter().any(|r| &r.url == url) {
                self.repositories.push(RepositoryConfig {
                    url: url.clone(),
                    branch: Some(deployment.branch.clone()),
                });
            }
        }
    }

    pub fn remove_deployment(&mut self, key: &DeploymentKey) -> bool {
        let before = self.deployments.len();
        self.deployments.retain(|d| &d.key() != key);
        before != self.deployments.len()
    }
}

// ============================================================================
// ConfigStore
// ============================================================================

#[derive(Debug, Clone)]
pub struct ConfigStore {
    store: JsonStore,
}

impl ConfigStore {
    pub fn new(store: JsonStore) -> Self {
        Self { store }
    }

    /// Load, or defaults when the file is missing
    pub fn load(&self) -> Result<BerthConfig> {
        Ok(self
            .store
            .load_optional::<BerthConfig>(CONFIG_FILE)?
            .unwrap_or_default())
    }

    /// Load, then apply `BERTH_*` environment overrides
    pub fn load_with_env(&self) -> Result<BerthConfig> {
        let mut config = self.load()?;
        config.settings.apply_env();
        Ok(config)
    }

    pub fn save(&self, config: &BerthConfig) -> Result<()> {
        self.store.save(CONFIG_FILE, config)
    }

    /// load → modify → save
    pub fn update<T>(&self, f: impl FnOnce(&mut BerthConfig) -> T) -> Result<T> {
        let mut config = self.load()?;
        let out = f(&mut config);
        self.save(&config)?;
        Ok(out)
    }

    pub fn persist_deployment(&self, deployment: &Deployment) -> Result<()> {
        debug!(deployment = %deployment.key(), "Persisting deployment");
        self.update(|config| config.upsert_deployment(deployment))
    }

    pub fn forget_deployment(&self, key: &DeploymentKey) -> Result<bool> {
        debug!(deployment = %key, "Removing persisted deployment");
        self.update(|config| config.remove_deployment(key))
    }
}
