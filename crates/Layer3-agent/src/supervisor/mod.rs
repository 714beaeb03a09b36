//! Supervisor
//!
//! Keeps one container alive per deployment. Each tracked agent runs as its
//! own actor that health-checks the container on an interval and restarts
//! it with bounded backoff. After `max_restart_attempts` consecutive failed
//! checks the agent is dropped from tracking and the failure is only logged.
//!
//! ## Usage
//!
//! ```ignore
//! let supervisor = Supervisor::new(containers, SupervisorConfig::default());
//! let mut events = supervisor.subscribe();
//!
//! supervisor.start_all(&registry).await;
//! while let Ok(event) = events.recv().await {
//!     println!("{} {:?}", event.key, event.kind);
//! }
//! ```

mod actor;
mod backoff;
mod state;

pub use backoff::{SupervisorConfig, MAX_BACKOFF};
pub use state::{AgentEvent, AgentEventKind, AgentState, AgentStatus};

use actor::{ActorContext, AgentCommand, AgentTable};
use berth_core::{container_name, ContainerManager, DeploymentRegistry};
use berth_foundation::{Deployment, DeploymentKey, Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 256;

pub struct Supervisor {
    containers: Arc<ContainerManager>,
    config: SupervisorConfig,
    agents: AgentTable,
    events: broadcast::Sender<AgentEvent>,
    next_generation: AtomicU64,
    /// Serializes start/stop so a key is never started twice
    op_lock: Mutex<()>,
}

impl Supervisor {
    pub fn new(containers: Arc<ContainerManager>, config: SupervisorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            containers,
            config,
            agents: AgentTable::default(),
            events,
            next_generation: AtomicU64::new(1),
            op_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Lifecycle events of every agent
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub fn is_tracked(&self, key: &DeploymentKey) -> bool {
        self.agents.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.agents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.lock().is_empty()
    }

    /// Snapshot of every tracked agent, ordered by deployment
    pub fn status(&self) -> Vec<AgentStatus> {
        let mut statuses: Vec<AgentStatus> = self
            .agents
            .lock()
            .values()
            .map(|handle| handle.status.borrow().clone())
            .collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    /// State changes of one agent
    pub fn watch(&self, key: &DeploymentKey) -> Option<watch::Receiver<AgentStatus>> {
        self.agents.lock().get(key).map(|handle| handle.status.clone())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start supervising `deployment`; a no-op when it is already tracked
    ///
    /// The deployment's `manifest.json` takes precedence over the stored
    /// record, here and on every later restart.
    pub async fn start_agent(&self, deployment: &Deployment) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        let key = deployment.key();

        if self.is_tracked(&key) {
            debug!(deployment = %key, "Agent already supervised");
            return Ok(());
        }
        if !deployment.enabled {
            return Err(Error::InvalidInput(format!(
                "Deployment {} is disabled",
                key
            )));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (handle, ready) = actor::spawn(
            deployment.clone(),
            generation,
            ActorContext {
                containers: self.containers.clone(),
                config: self.config.clone(),
                events: self.events.clone(),
                table: self.agents.clone(),
            },
        );

        match ready.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(deployment = %key, "Failed to start agent: {}", e);
                return Err(e);
            }
            Err(_) => {
                return Err(Error::Internal(format!(
                    "Agent actor for {} exited during start",
                    key
                )))
            }
        }

        let container = handle.status.borrow().container.clone();
        self.agents.lock().insert(key.clone(), handle);
        info!(deployment = %key, container = %container, "Agent started");
        Ok(())
    }

    /// Stop and remove the container; clears tracking
    ///
    /// An untracked deployment still gets its container removed.
    pub async fn stop_agent(&self, key: &DeploymentKey) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        let handle = self.agents.lock().remove(key);

        let Some(handle) = handle else {
            debug!(deployment = %key, "Agent not supervised, removing container only");
            return self.containers.remove_container(&container_name(key)).await;
        };

        let (tx, rx) = oneshot::channel();
        let result = match handle.commands.send(AgentCommand::Stop(tx)).await {
            Ok(()) => rx.await.unwrap_or(Ok(())),
            Err(_) => self.containers.remove_container(&container_name(key)).await,
        };
        let _ = handle.task.await;
        result
    }

    /// Stop, wait the settle delay, start again
    pub async fn restart_agent(&self, key: &DeploymentKey) -> Result<()> {
        self.request(key, AgentCommand::Restart).await?
    }

    /// Whether the agent's container is running right now
    pub async fn check_agent_health(&self, key: &DeploymentKey) -> Result<bool> {
        self.request(key, AgentCommand::Check).await
    }

    /// Report an exited container; runs the backoff restart flow
    pub async fn handle_agent_exit(&self, key: &DeploymentKey) -> Result<()> {
        self.sender(key)?
            .send(AgentCommand::Exited)
            .await
            .map_err(|_| not_supervised(key))
    }

    /// Start every enabled deployment; returns how many are supervised
    pub async fn start_all(&self, registry: &DeploymentRegistry) -> usize {
        let mut started = 0;
        for deployment in registry.list().await {
            if !deployment.enabled {
                debug!(deployment = %deployment.key(), "Skipping disabled deployment");
                continue;
            }
            match self.start_agent(&deployment).await {
                Ok(()) => started += 1,
                Err(e) => warn!(deployment = %deployment.key(), "Agent not started: {}", e),
            }
        }
        info!(started, "Supervisor started agents");
        started
    }

    pub async fn stop_all(&self) {
        let keys: Vec<DeploymentKey> = self.agents.lock().keys().cloned().collect();
        for key in keys {
            if let Err(e) = self.stop_agent(&key).await {
                warn!(deployment = %key, "Failed to stop agent: {}", e);
            }
        }
    }

    fn sender(&self, key: &DeploymentKey) -> Result<mpsc::Sender<AgentCommand>> {
        self.agents
            .lock()
            .get(key)
            .map(|handle| handle.commands.clone())
            .ok_or_else(|| not_supervised(key))
    }

    async fn request<T>(
        &self,
        key: &DeploymentKey,
        command: impl FnOnce(oneshot::Sender<T>) -> AgentCommand,
    ) -> Result<T> {
        let sender = self.sender(key)?;
        let (tx, rx) = oneshot::channel();
        sender
            .send(command(tx))
            .await
            .map_err(|_| not_supervised(key))?;
        rx.await.map_err(|_| not_supervised(key))
    }
}

fn not_supervised(key: &DeploymentKey) -> Error {
    Error::NotFound(format!("Agent {} is not supervised", key))
}
