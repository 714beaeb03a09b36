//! Shared wiring for every subcommand

use anyhow::{Context, Result};
use berth_agent::{Supervisor, SupervisorConfig};
use berth_core::{
    CliRuntime, ContainerManager, ContainerRuntime, DeploymentRegistry, GitSync, MemoryRuntime,
    RuntimeKind,
};
use berth_foundation::{BerthPaths, ConfigStore, Settings};
use berth_task::{
    DirMailboxFactory, MailboxRegistry, MailboxSweeper, OrchestratorConfig, TaskOrchestrator,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How often `serve` sweeps mailboxes
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Container runtime selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RuntimeChoice {
    /// Docker if installed, else Podman
    Auto,
    Docker,
    Podman,
    /// In-process fake (nothing survives the command)
    Memory,
}

impl RuntimeChoice {
    /// `settings.runtime` from config.json
    pub fn from_setting(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "memory" => Ok(Self::Memory),
            other => Ok(match other.parse::<RuntimeKind>()? {
                RuntimeKind::Docker => Self::Docker,
                RuntimeKind::Podman => Self::Podman,
            }),
        }
    }

    fn build(self) -> Result<Arc<dyn ContainerRuntime>> {
        Ok(match self {
            Self::Auto => Arc::new(CliRuntime::detect()?),
            Self::Docker => Arc::new(CliRuntime::docker()),
            Self::Podman => Arc::new(CliRuntime::podman()),
            Self::Memory => Arc::new(MemoryRuntime::new()),
        })
    }
}

/// Resolve the home directory and read `settings` from config.json
pub fn load_settings(home: Option<PathBuf>) -> Result<(BerthPaths, Settings)> {
    let paths = BerthPaths::resolve(home)?;
    let settings = ConfigStore::new(paths.store())
        .load_with_env()
        .with_context(|| format!("Failed to load config from {}", paths.home().display()))?
        .settings;
    Ok((paths, settings))
}

pub struct App {
    pub paths: BerthPaths,
    pub settings: Settings,
    pub containers: Arc<ContainerManager>,
    pub mailboxes: Arc<MailboxRegistry>,
    pub registry: Arc<DeploymentRegistry>,
}

impl App {
    /// Wire the runtime, mailboxes and registry; rehydrates deployments
    pub async fn open(
        paths: BerthPaths,
        settings: Settings,
        runtime: Option<RuntimeChoice>,
    ) -> Result<Self> {
        let choice = match runtime {
            Some(choice) => choice,
            None => RuntimeChoice::from_setting(&settings.runtime)?,
        };
        let containers = Arc::new(ContainerManager::new(choice.build()?, paths.clone()));

        let factory =
            DirMailboxFactory::new(paths.clone()).with_poll_interval(settings.poll_interval());
        let mailboxes = Arc::new(MailboxRegistry::new(Arc::new(factory)));

        let registry = Arc::new(
            DeploymentRegistry::new(paths.clone(), containers.clone(), Arc::new(GitSync::new()))
                .with_mailboxes(mailboxes.clone()),
        );
        let loaded = registry.load().await?;
        debug!(
            home = %paths.home().display(),
            runtime = ?choice,
            deployments = loaded,
            "Opened berth home"
        );

        Ok(Self {
            paths,
            settings,
            containers,
            mailboxes,
            registry,
        })
    }

    pub fn orchestrator(&self) -> TaskOrchestrator {
        TaskOrchestrator::new(
            self.mailboxes.clone(),
            OrchestratorConfig {
                default_timeout: self.settings.task_timeout(),
                ..Default::default()
            },
        )
    }

    pub fn supervisor(&self) -> Supervisor {
        Supervisor::new(
            self.containers.clone(),
            SupervisorConfig::from(&self.settings.supervisor),
        )
    }

    pub fn sweeper(&self) -> MailboxSweeper {
        MailboxSweeper::new(
            self.mailboxes.clone(),
            SWEEP_INTERVAL,
            self.settings.orphan_retention(),
        )
    }

    /// Open every deployment's mailbox so a sweep covers all of them
    pub async fn open_all_mailboxes(&self) -> Result<usize> {
        for deployment in self.registry.list().await {
            self.mailboxes.get_or_open(&deployment.key()).await?;
        }
        Ok(self.mailboxes.len().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_runtime_from_setting() {
        assert_eq!(RuntimeChoice::from_setting("auto").unwrap(), RuntimeChoice::Auto);
        assert_eq!(RuntimeChoice::from_setting("").unwrap(), RuntimeChoice::Auto);
        assert_eq!(RuntimeChoice::from_setting("Podman").unwrap(), RuntimeChoice::Podman);
        assert_eq!(RuntimeChoice::from_setting("memory").unwrap(), RuntimeChoice::Memory);
        assert!(RuntimeChoice::from_setting("lxc").is_err());
    }

    #[tokio::test]
    async fn test_open_empty_home() {
        let dir = TempDir::new().unwrap();
        let (paths, settings) = load_settings(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(settings, Settings::default());

        let app = App::open(paths, settings, Some(RuntimeChoice::Memory))
            .await
            .unwrap();
        assert_eq!(app.registry.len().await, 0);
        assert_eq!(app.open_all_mailboxes().await.unwrap(), 0);
        assert_eq!(app.orchestrator().config().default_timeout, Duration::from_secs(30));
    }
}
