//! One open mailbox per deployment, shared by the orchestrator and the sweeper

use super::{MailboxFactory, TaskMailbox};
use berth_foundation::{DeploymentKey, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub struct MailboxRegistry {
    factory: Arc<dyn MailboxFactory>,
    mailboxes: RwLock<HashMap<DeploymentKey, Arc<dyn TaskMailbox>>>,
}

impl MailboxRegistry {
    pub fn new(factory: Arc<dyn MailboxFactory>) -> Self {
        Self {
            factory,
            mailboxes: RwLock::new(HashMap::new()),
        }
    }

    /// Cached mailbox for `deployment`, opening it on first use
    pub async fn get_or_open(&self, deployment: &DeploymentKey) -> Result<Arc<dyn TaskMailbox>> {
        if let Some(mailbox) = self.mailboxes.read().await.get(deployment) {
            return Ok(Arc::clone(mailbox));
        }

        let mut mailboxes = self.mailboxes.write().await;
        if let Some(mailbox) = mailboxes.get(deployment) {
            return Ok(Arc::clone(mailbox));
        }

        let mailbox = self.factory.open(deployment)?;
        debug!(
            deployment = %deployment,
            backend = mailbox.backend(),
            "Mailbox opened"
        );
        mailboxes.insert(deployment.clone(), Arc::clone(&mailbox));
        Ok(mailbox)
    }

    /// Forget a deployment's mailbox (after removal)
    pub async fn evict(&self, deployment: &DeploymentKey) -> bool {
        self.mailboxes.write().await.remove(deployment).is_some()
    }

    /// Snapshot of every open mailbox
    pub async fn all(&self) -> Vec<Arc<dyn TaskMailbox>> {
        self.mailboxes.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.mailboxes.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::MemoryMailboxFactory;

    #[tokio::test]
    async fn test_open_once_and_evict() {
        let registry = MailboxRegistry::new(Arc::new(MemoryMailboxFactory::new()));
        let key = DeploymentKey::new("Example.com", "/api/");

        let a = registry.get_or_open(&key).await.unwrap();
        let b = registry.get_or_open(&key).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len().await, 1);

        assert!(registry.evict(&key).await);
        assert!(!registry.evict(&key).await);
        assert!(registry.all().await.is_empty());
    }
}
