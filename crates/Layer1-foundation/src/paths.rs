//! On-disk layout of a Berth home directory
//!
//! ```text
//! <home>/
//! ├── config.json                  # configuration store
//! ├── runtime/                     # shared runtime support (mounted read-only)
//! └── deployments/<slug>/
//!     ├── code/                    # deployment code (mounted read-write)
//!     ├── mailbox/                 # task mailbox (mounted read-write)
//!     └── manifest.json
//! ```

use crate::deployment::DeploymentKey;
use crate::storage::JsonStore;
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment variable that overrides the home directory
pub const HOME_ENV: &str = "BERTH_HOME";

/// Manifest file name inside a deployment directory
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone)]
pub struct BerthPaths {
    home: PathBuf,
}

impl BerthPaths {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// `--home` flag, then `$BERTH_HOME`, then the platform data dir
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self> {
        if let Some(home) = explicit {
            return Ok(Self::new(home));
        }
        if let Ok(home) = std::env::var(HOME_ENV) {
            if !home.is_empty() {
                return Ok(Self::new(home));
            }
        }
        let dir = dirs::data_dir()
            .ok_or_else(|| Error::Config("Cannot find data directory".to_string()))?
            .join("berth");
        Ok(Self::new(dir))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn store(&self) -> JsonStore {
        JsonStore::new(&self.home)
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.home.join("runtime")
    }

    pub fn deployments_dir(&self) -> PathBuf {
        self.home.join("deployments")
    }

    pub fn deployment_dir(&self, key: &DeploymentKey) -> PathBuf {
        self.deployments_dir().join(key.slug())
    }

    pub fn code_dir(&self, key: &DeploymentKey) -> PathBuf {
        self.deployment_dir(key).join("code")
    }

    pub fn mailbox_dir(&self, key: &DeploymentKey) -> PathBuf {
        self.deployment_dir(key).join("mailbox")
    }

    pub fn manifest_path(&self, key: &DeploymentKey) -> PathBuf {
        self.deployment_dir(key).join(MANIFEST_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = BerthPaths::new("/srv/berth");
        let key = DeploymentKey::new("example.com", "/api");
        assert_eq!(
            paths.mailbox_dir(&key),
            PathBuf::from("/srv/berth/deployments/example.com-api-ed55692a/mailbox")
        );
        assert_eq!(
            paths.manifest_path(&key),
            PathBuf::from("/srv/berth/deployments/example.com-api-ed55692a/manifest.json")
        );
        assert_eq!(paths.runtime_dir(), PathBuf::from("/srv/berth/runtime"));
    }

    #[test]
    fn test_explicit_home_wins() {
        let paths = BerthPaths::resolve(Some(PathBuf::from("/tmp/explicit"))).unwrap();
        assert_eq!(paths.home(), Path::new("/tmp/explicit"));
    }
}
