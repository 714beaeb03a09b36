//! Deployment - an agent bound to a (domain, path) route

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Default branch
pub const DEFAULT_BRANCH: &str = "main";

/// Default container image
pub const DEFAULT_IMAGE: &str = "node:20-slim";

// ============================================================================
// DeploymentKey - (domain, path) identity
// ============================================================================

/// Identity of a deployment. Domain is lowercased; path always starts with `/`
/// and never ends with one (except the root path itself).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeploymentKey {
    pub domain: String,
    pub path: String,
}

impl DeploymentKey {
    pub fn new(domain: impl AsRef<str>, path: impl AsRef<str>) -> Self {
        Self {
            domain: normalize_domain(domain.as_ref()),
            path: normalize_path(path.as_ref()),
        }
    }

    /// Route lookup key: `domain + path`
    pub fn route(&self) -> String {
        format!("{}{}", self.domain, self.path)
    }

    /// Filesystem/container safe slug for this identity
    ///
    /// Lowercase, characters outside `[a-z0-9_.-]` become `-`, runs of `-`
    /// collapse, and leading/trailing separators are trimmed. The first 8 hex
    /// digits of the route's SHA-256 are appended, so two keys share a slug
    /// only when their routes are equal.
    pub fn slug(&self) -> String {
        static INVALID: OnceLock<Regex> = OnceLock::new();
        static DASHES: OnceLock<Regex> = OnceLock::new();
        let invalid = INVALID.get_or_init(|| Regex::new(r"[^a-z0-9_.-]").expect("valid regex"));
        let dashes = DASHES.get_or_init(|| Regex::new(r"-{2,}").expect("valid regex"));

        let raw = if self.path == "/" {
            self.domain.clone()
        } else {
            format!("{}{}", self.domain, self.path)
        };
        let lowered = raw.to_lowercase();
        let replaced = invalid.replace_all(&lowered, "-");
        let collapsed = dashes.replace_all(&replaced, "-");
        let readable = collapsed.trim_matches(|c| c == '-' || c == '.');
        let digest = hex::encode(Sha256::digest(self.route().as_bytes()));
        if readable.is_empty() {
            digest[..8].to_string()
        } else {
            format!("{}-{}", readable, &digest[..8])
        }
    }
}

impl fmt::Display for DeploymentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.domain, self.path)
    }
}

/// Lowercase a host and drop any `:port` suffix
pub fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim();
    let host = match domain.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => domain,
    };
    host.to_ascii_lowercase()
}

/// `""` → `/`, `api/` → `/api`, `//a//b/` → `/a/b`
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

// ============================================================================
// Deployment
// ============================================================================

/// Deployment record, persisted in the config store's `deployments[]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub domain: String,
    pub path: String,

    /// Agent name
    pub agent: String,

    /// Code source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,

    /// Container image
    #[serde(default = "default_image")]
    pub image: String,

    /// Override start command (shell words)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Container name recorded once the container has been ensured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_enabled() -> bool {
    true
}

impl Deployment {
    /// Create a deployment with defaults (branch `main`, default image, empty env)
    pub fn new(key: &DeploymentKey, agent: impl Into<String>) -> Self {
        Self {
            domain: key.domain.clone(),
            path: key.path.clone(),
            agent: agent.into(),
            repository: None,
            branch: default_branch(),
            sub_path: None,
            image: default_image(),
            command: None,
            environment: BTreeMap::new(),
            enabled: true,
            container_name: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn key(&self) -> DeploymentKey {
        DeploymentKey::new(&self.domain, &self.path)
    }

    /// Source fields that require a code re-sync when changed
    pub fn source_differs(&self, other: &Deployment) -> bool {
        self.repository != other.repository
            || self.branch != other.branch
            || self.sub_path != other.sub_path
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_normalization() {
        let key = DeploymentKey::new("Example.COM:8080", "api/v1/");
        assert_eq!(key.domain, "example.com");
        assert_eq!(key.path, "/api/v1");
        assert_eq!(key.route(), "example.com/api/v1");

        assert_eq!(DeploymentKey::new("host", "").path, "/");
        assert_eq!(DeploymentKey::new("host", "//a//b/").path, "/a/b");
    }

    #[test]
    fn test_slug() {
        assert_eq!(
            DeploymentKey::new("example.com", "/api/v1").slug(),
            "example.com-api-v1-b3bb5815"
        );
        assert_eq!(
            DeploymentKey::new("example.com", "/").slug(),
            "example.com-73d986e0"
        );
        assert_eq!(
            DeploymentKey::new("host", "/Weird Path/**/x").slug(),
            "host-weird-path-x-1d78ce8d"
        );
    }

    #[test]
    fn test_slug_distinguishes_lookalike_routes() {
        let keys = [
            DeploymentKey::new("host", "/a/b"),
            DeploymentKey::new("host", "/a-b"),
            DeploymentKey::new("host-a", "/b"),
            DeploymentKey::new("host", "/API"),
            DeploymentKey::new("host", "/api"),
        ];
        let slugs: std::collections::HashSet<String> = keys.iter().map(|k| k.slug()).collect();
        assert_eq!(slugs.len(), keys.len());

        assert_eq!(keys[0].slug(), "host-a-b-02c2b0e6");
        assert_eq!(keys[1].slug(), "host-a-b-ee35f3d5");
        assert_eq!(keys[2].slug(), "host-a-b-9d3c085e");
        assert_eq!(keys[3].slug(), "host-api-87a615e7");
        assert_eq!(keys[4].slug(), "host-api-cdb990cf");

        // same identity after normalization
        assert_eq!(
            DeploymentKey::new("HOST:8080", "//a//b/").slug(),
            keys[0].slug()
        );
    }

    #[test]
    fn test_deployment_defaults() {
        let key = DeploymentKey::new("host", "/x");
        let deployment = Deployment::new(&key, "demo");
        assert_eq!(deployment.branch, "main");
        assert_eq!(deployment.image, DEFAULT_IMAGE);
        assert!(deployment.environment.is_empty());
        assert!(deployment.enabled);
        assert_eq!(deployment.key(), key);
    }

    #[test]
    fn test_deserialize_minimal_record() {
        let json = r#"{
            "domain": "host",
            "path": "/x",
            "agent": "demo",
            "createdAt": "2024-01-01T00:00:00Z"
        }"#;
        let deployment: Deployment = serde_json::from_str(json).unwrap();
        assert_eq!(deployment.branch, "main");
        assert!(deployment.enabled);
        assert!(deployment.repository.is_none());
    }
}
