//! In-process container runtime
//!
//! Keeps container state in a map. Used by tests and by `--runtime memory`
//! dry runs. Crashes and image pull failures can be simulated.

use super::{ContainerRuntime, ContainerSpec, ContainerStatus};
use async_trait::async_trait;
use berth_foundation::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryContainer {
    spec: ContainerSpec,
    running: bool,
}

#[derive(Default)]
struct Inner {
    containers: BTreeMap<String, MemoryContainer>,
    creations: usize,
    restarts: usize,
    rejected_images: BTreeSet<String>,
    fail_creates: bool,
}

#[derive(Default)]
pub struct MemoryRuntime {
    inner: Mutex<Inner>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creating a container from `image` fails (e.g. an unqualified name)
    pub fn reject_image(&self, image: impl Into<String>) {
        self.inner.lock().rejected_images.insert(image.into());
    }

    /// Every create fails until turned off again
    pub fn fail_creates(&self, fail: bool) {
        self.inner.lock().fail_creates = fail;
    }

    /// Simulate the container's process exiting
    pub fn crash(&self, name: &str) {
        if let Some(container) = self.inner.lock().containers.get_mut(name) {
            container.running = false;
        }
    }

    /// Total successful creates
    pub fn creations(&self) -> usize {
        self.inner.lock().creations
    }

    pub fn restarts(&self) -> usize {
        self.inner.lock().restarts
    }

    pub fn container_names(&self) -> Vec<String> {
        self.inner.lock().containers.keys().cloned().collect()
    }

    /// Spec the named container was created from
    pub fn spec(&self, name: &str) -> Option<ContainerSpec> {
        self.inner.lock().containers.get(name).map(|c| c.spec.clone())
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    fn name(&self) -> &str {
        "memory"
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerStatus>> {
        Ok(self
            .inner
            .lock()
            .containers
            .get(name)
            .map(|c| ContainerStatus {
                name: name.to_string(),
                running: c.running,
            }))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_creates {
            return Err(Error::container(format!("create {} failed", spec.name)));
        }
        if inner.rejected_images.contains(&spec.image) {
            return Err(Error::container(format!(
                "Unable to find image '{}'",
                spec.image
            )));
        }
        if inner.containers.contains_key(&spec.name) {
            return Err(Error::container(format!(
                "Conflict. The container name \"{}\" is already in use",
                spec.name
            )));
        }
        inner.containers.insert(
            spec.name.clone(),
            MemoryContainer {
                spec: spec.clone(),
                running: true,
            },
        );
        inner.creations += 1;
        debug!(container = %spec.name, "Created container (memory)");
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<()> {
        match self.inner.lock().containers.get_mut(name) {
            Some(container) => {
                container.running = true;
                Ok(())
            }
            None => Err(Error::container(format!("No such container: {}", name))),
        }
    }

    async fn stop(&self, name: &str) -> Result<()> {
        if let Some(container) = self.inner.lock().containers.get_mut(name) {
            container.running = false;
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.inner.lock().containers.remove(name);
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.containers.get_mut(name) {
            Some(container) => {
                container.running = true;
                inner.restarts += 1;
                Ok(())
            }
            None => Err(Error::container(format!("No such container: {}", name))),
        }
    }
}
