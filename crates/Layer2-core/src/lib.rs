//! berth-core: Core Runtime for Berth
//!
//! Layer2 - deployments and container lifecycle
//!
//! # Modules
//!
//! - `container`: container spec, runtimes (docker/podman/memory), lifecycle
//! - `deployment`: deployment registry, manifest, code sync
//! - `resolver`: (hostname, path) → deployment (longest prefix)
//!
//! # Usage
//!
//! ```ignore
//! use berth_core::{ContainerManager, DeploymentRegistry, DeployConfig, GitSync, RequestResolver};
//!
//! let containers = Arc::new(ContainerManager::new(Arc::new(CliRuntime::detect()?), paths.clone()));
//! let registry = Arc::new(DeploymentRegistry::new(paths, containers, Arc::new(GitSync::new())));
//! registry.load().await?;
//!
//! // Deploy
//! registry.deploy_agent("example.com", "/api", DeployConfig::new("demo")).await?;
//!
//! // Match a request
//! let resolver = RequestResolver::new(registry.clone());
//! let deployment = resolver.resolve("example.com", "/api/v1/items").await;
//! ```

pub mod container;
pub mod deployment;
pub mod resolver;

// Re-exports: Container
pub use container::{
    container_name, qualify_image, CliRuntime, ContainerManager, ContainerRuntime, ContainerSpec,
    ContainerStatus, MemoryRuntime, RuntimeKind, VolumeMount,
};

// Re-exports: Deployment
pub use deployment::{
    CodeSync, DeployConfig, DeploymentRegistry, DeploymentUpdate, GitSync, Manifest, NoopSync,
};

// Re-exports: Resolver
pub use resolver::{candidate_paths, RequestResolver};
