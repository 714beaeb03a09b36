//! `manifest.json` - snapshot of a deployment's configuration
//!
//! Written on every prepare/update, after the container step succeeded.
//! Operators may also edit it by hand. The supervisor reads it on every start
//! and restart, so the container is always built from the latest snapshot.

use berth_foundation::{write_atomic, Deployment, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub agent: String,
    pub domain: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Manifest {
    pub fn from_deployment(deployment: &Deployment) -> Self {
        Self {
            agent: deployment.agent.clone(),
            domain: deployment.domain.clone(),
            path: deployment.path.clone(),
            repository: deployment.repository.clone(),
            branch: deployment.branch.clone(),
            sub_path: deployment.sub_path.clone(),
            image: deployment.image.clone(),
            command: deployment.command.clone(),
            environment: deployment.environment.clone(),
            created_at: deployment.created_at,
            updated_at: deployment.updated_at,
        }
    }

    /// `Ok(None)` when the file does not exist
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).map(Some).map_err(|e| {
                Error::Config(format!("Invalid manifest {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &content)
    }

    /// Fields that shape the container: agent, sub path, image, command,
    /// environment (replaced as a whole)
    pub fn apply_overrides(&self, deployment: &mut Deployment) {
        if !self.agent.trim().is_empty() {
            deployment.agent = self.agent.clone();
        }
        deployment.sub_path = self.sub_path.clone();
        if !self.image.trim().is_empty() {
            deployment.image = self.image.clone();
        }
        deployment.command = self.command.clone();
        deployment.environment = self.environment.clone();
    }
}
