//! Request Resolver
//!
//! Maps `(hostname, pathname)` to the most specific enabled deployment:
//! `/api/v1/items` tries `/api/v1/items`, `/api/v1`, `/api`, then `/`.

use crate::deployment::DeploymentRegistry;
use berth_foundation::{normalize_path, Deployment, DeploymentKey};
use std::sync::Arc;
use tracing::debug;

pub struct RequestResolver {
    registry: Arc<DeploymentRegistry>,
}

impl RequestResolver {
    pub fn new(registry: Arc<DeploymentRegistry>) -> Self {
        Self { registry }
    }

    pub async fn resolve(&self, hostname: &str, pathname: &str) -> Option<Deployment> {
        for path in candidate_paths(pathname) {
            let key = DeploymentKey::new(hostname, &path);
            if let Some(deployment) = self.registry.get(&key).await {
                if deployment.enabled {
                    debug!(hostname, pathname, deployment = %key, "Resolved request");
                    return Some(deployment);
                }
            }
        }
        debug!(hostname, pathname, "No deployment matched");
        None
    }
}

/// Route prefixes from most to least specific, ending with `/`
pub fn candidate_paths(pathname: &str) -> Vec<String> {
    let pathname = pathname
        .split(&['?', '#'][..])
        .next()
        .unwrap_or_default();
    let normalized = normalize_path(pathname);

    let mut candidates = vec![normalized.clone()];
    let mut current = normalized.as_str();
    while let Some((parent, _)) = current.rsplit_once('/') {
        if parent.is_empty() {
            break;
        }
        candidates.push(parent.to_string());
        current = parent;
    }
    if normalized != "/" {
        candidates.push("/".to_string());
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerManager, MemoryRuntime};
    use crate::deployment::{DeployConfig, DeploymentUpdate, NoopSync};
    use berth_foundation::BerthPaths;
    use tempfile::TempDir;

    #[test]
    fn test_candidate_paths() {
        assert_eq!(
            candidate_paths("/a/b/c"),
            vec!["/a/b/c", "/a/b", "/a", "/"]
        );
        assert_eq!(candidate_paths("a//b/?q=1"), vec!["/a/b", "/a", "/"]);
        assert_eq!(candidate_paths("/"), vec!["/"]);
        assert_eq!(candidate_paths(""), vec!["/"]);
    }

    async fn registry(dir: &TempDir) -> Arc<DeploymentRegistry> {
        let paths = BerthPaths::new(dir.path());
        let containers = Arc::new(ContainerManager::new(
            Arc::new(MemoryRuntime::new()),
            paths.clone(),
        ));
        let registry = Arc::new(DeploymentRegistry::new(paths, containers, Arc::new(NoopSync)));
        for path in ["/a", "/a/b"] {
            registry
                .deploy_agent("host", path, DeployConfig::new("demo"))
                .await
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn test_longest_prefix() {
        let dir = TempDir::new().unwrap();
        let resolver = RequestResolver::new(registry(&dir).await);

        let hit = resolver.resolve("host", "/a/b/c").await.unwrap();
        assert_eq!(hit.path, "/a/b");

        let hit = resolver.resolve("HOST:8080", "/a/x").await.unwrap();
        assert_eq!(hit.path, "/a");

        assert_eq!(resolver.resolve("host", "/a").await.unwrap().path, "/a");
        assert!(resolver.resolve("host", "/other").await.is_none());
        assert!(resolver.resolve("elsewhere", "/a").await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_deployments_are_skipped() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir).await;
        registry
            .update_deployment(
                "host",
                "/a/b",
                DeploymentUpdate {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let resolver = RequestResolver::new(registry);
        assert_eq!(resolver.resolve("host", "/a/b/c").await.unwrap().path, "/a");
    }
}
