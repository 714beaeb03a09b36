//! Per-agent supervision actor
//!
//! One task per tracked deployment owns the state and the restart counter.
//! The supervisor talks to it only through commands on an `mpsc` channel;
//! state goes out on a `watch` channel and lifecycle events on a broadcast.

use super::backoff::SupervisorConfig;
use super::state::{AgentEvent, AgentEventKind, AgentState, AgentStatus};
use berth_core::{container_name, ContainerManager, Manifest};
use berth_foundation::{Deployment, DeploymentKey, Error, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const COMMAND_BUFFER: usize = 16;

/// Tracked agents by deployment
pub(crate) type AgentTable = Arc<Mutex<HashMap<DeploymentKey, AgentHandle>>>;

pub(crate) enum AgentCommand {
    /// Probe the container, no side effects
    Check(oneshot::Sender<bool>),
    /// The container was observed to exit
    Exited,
    /// Stop, settle, start (does not count as a restart attempt)
    Restart(oneshot::Sender<Result<()>>),
    /// Stop and remove the container, then end supervision
    Stop(oneshot::Sender<Result<()>>),
}

pub(crate) struct AgentHandle {
    pub(crate) generation: u64,
    pub(crate) commands: mpsc::Sender<AgentCommand>,
    pub(crate) status: watch::Receiver<AgentStatus>,
    pub(crate) task: JoinHandle<()>,
}

/// Everything an actor needs besides the deployment itself
pub(crate) struct ActorContext {
    pub(crate) containers: Arc<ContainerManager>,
    pub(crate) config: SupervisorConfig,
    pub(crate) events: broadcast::Sender<AgentEvent>,
    pub(crate) table: AgentTable,
}

/// Spawn the actor; the receiver resolves once the first start finished
pub(crate) fn spawn(
    deployment: Deployment,
    generation: u64,
    context: ActorContext,
) -> (AgentHandle, oneshot::Receiver<Result<()>>) {
    let key = deployment.key();
    let container = container_name(&key);
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
    let (status_tx, status_rx) = watch::channel(AgentStatus {
        key,
        container: container.clone(),
        state: AgentState::Starting,
        restarts: 0,
        started_at: Utc::now(),
    });
    let (ready_tx, ready_rx) = oneshot::channel();

    let actor = AgentActor {
        deployment,
        container,
        generation,
        restarts: 0,
        commands: commands_rx,
        status: status_tx,
        context,
    };
    let task = tokio::spawn(actor.run(ready_tx));

    let handle = AgentHandle {
        generation,
        commands: commands_tx,
        status: status_rx,
        task,
    };
    (handle, ready_rx)
}

enum Flow {
    Continue,
    Exit,
}

struct AgentActor {
    deployment: Deployment,
    container: String,
    generation: u64,
    /// Restart attempts since the last healthy check
    restarts: u32,
    commands: mpsc::Receiver<AgentCommand>,
    status: watch::Sender<AgentStatus>,
    context: ActorContext,
}

impl AgentActor {
    async fn run(mut self, ready: oneshot::Sender<Result<()>>) {
        if let Err(e) = self.start().await {
            self.set_state(AgentState::Stopped);
            let _ = ready.send(Err(e));
            return;
        }
        self.emit(AgentEventKind::Started);
        let _ = ready.send(Ok(()));

        let period = self.context.config.health_check_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let flow = tokio::select! {
                _ = ticker.tick() => self.on_tick().await,
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => Flow::Exit,
                },
            };
            if let Flow::Exit = flow {
                break;
            }
        }
        debug!(deployment = %self.key(), "Supervision ended");
    }

    fn key(&self) -> DeploymentKey {
        self.deployment.key()
    }

    async fn on_tick(&mut self) -> Flow {
        if !self.probe().await {
            return self.handle_exit().await;
        }
        if self.restarts > 0 {
            info!(
                deployment = %self.key(),
                restarts = self.restarts,
                "Agent healthy again, resetting restart counter"
            );
            self.restarts = 0;
            self.set_state(AgentState::Running);
            self.emit(AgentEventKind::Recovered);
        }
        Flow::Continue
    }

    async fn on_command(&mut self, command: AgentCommand) -> Flow {
        match command {
            AgentCommand::Check(reply) => {
                let healthy = self.probe().await;
                let _ = reply.send(healthy);
                Flow::Continue
            }
            AgentCommand::Exited => self.handle_exit().await,
            AgentCommand::Restart(reply) => {
                let result = self.restart().await;
                let _ = reply.send(result);
                Flow::Continue
            }
            AgentCommand::Stop(reply) => {
                let _ = reply.send(self.stop().await);
                Flow::Exit
            }
        }
    }

    /// Count an attempt, back off, restart; give up once attempts run out
    async fn handle_exit(&mut self) -> Flow {
        let key = self.key();
        self.set_state(AgentState::Unhealthy);
        self.emit(AgentEventKind::Unhealthy);

        self.restarts += 1;
        let max = self.context.config.max_restart_attempts;
        if self.restarts > max {
            error!(
                deployment = %key,
                container = %self.container,
                attempts = max,
                "Agent restart attempts exhausted, no longer supervised"
            );
            self.untrack();
            self.set_state(AgentState::Stopped);
            self.emit(AgentEventKind::GaveUp { attempts: max });
            return Flow::Exit;
        }

        let attempt = self.restarts;
        let delay = self.context.config.delay_for_attempt(attempt);
        warn!(
            deployment = %key,
            attempt,
            max_attempts = max,
            delay_ms = delay.as_millis() as u64,
            "Agent unhealthy, restarting after backoff"
        );
        self.set_state(AgentState::Restarting);
        self.emit(AgentEventKind::Restarting { attempt, delay });

        // Commands still get served while backing off
        let mut waiting = Vec::new();
        let backoff = tokio::time::sleep(delay);
        tokio::pin!(backoff);
        loop {
            tokio::select! {
                _ = &mut backoff => break,
                command = self.commands.recv() => match command {
                    Some(AgentCommand::Stop(reply)) => {
                        let _ = reply.send(self.stop().await);
                        return Flow::Exit;
                    }
                    Some(AgentCommand::Check(reply)) => {
                        let healthy = self.probe().await;
                        let _ = reply.send(healthy);
                    }
                    Some(AgentCommand::Restart(reply)) => waiting.push(reply),
                    Some(AgentCommand::Exited) => {}
                    None => return Flow::Exit,
                },
            }
        }

        let result = self.restart().await;
        if let Err(e) = &result {
            warn!(deployment = %key, attempt, "Restart attempt failed: {}", e);
        }
        for reply in waiting {
            let _ = reply.send(
                result
                    .as_ref()
                    .map(|_| ())
                    .map_err(|e| Error::container(e.to_string())),
            );
        }
        Flow::Continue
    }

    async fn start(&mut self) -> Result<()> {
        self.refresh_from_manifest()?;
        self.context
            .containers
            .ensure_container(&self.deployment)
            .await?;
        let restarts = self.restarts;
        self.status.send_modify(|status| {
            status.state = AgentState::Running;
            status.restarts = restarts;
            status.started_at = Utc::now();
        });
        Ok(())
    }

    /// Pick up updates the registry (or an operator) wrote since the last start
    fn refresh_from_manifest(&mut self) -> Result<()> {
        let path = self.context.containers.paths().manifest_path(&self.key());
        if let Some(manifest) = Manifest::load(&path)? {
            manifest.apply_overrides(&mut self.deployment);
        }
        Ok(())
    }

    async fn restart(&mut self) -> Result<()> {
        info!(deployment = %self.key(), container = %self.container, "Restarting agent");
        let result = self.restart_inner().await;
        if result.is_err() {
            self.set_state(AgentState::Unhealthy);
        }
        result
    }

    async fn restart_inner(&mut self) -> Result<()> {
        self.context
            .containers
            .stop_container(&self.container)
            .await?;
        tokio::time::sleep(self.context.config.settle_delay).await;
        self.start().await
    }

    async fn stop(&mut self) -> Result<()> {
        let result = self
            .context
            .containers
            .remove_container(&self.container)
            .await;
        self.set_state(AgentState::Stopped);
        self.emit(AgentEventKind::Stopped);
        info!(deployment = %self.key(), container = %self.container, "Agent stopped");
        result
    }

    async fn probe(&self) -> bool {
        match self.context.containers.is_running(&self.container).await {
            Ok(running) => running,
            Err(e) => {
                warn!(container = %self.container, "Health check failed: {}", e);
                false
            }
        }
    }

    /// Drop our own table entry, unless a newer actor already replaced it
    fn untrack(&self) {
        let mut table = self.context.table.lock();
        let ours = table
            .get(&self.deployment.key())
            .is_some_and(|handle| handle.generation == self.generation);
        if ours {
            table.remove(&self.deployment.key());
        }
    }

    fn set_state(&self, state: AgentState) {
        let restarts = self.restarts;
        self.status.send_modify(|status| {
            status.state = state;
            status.restarts = restarts;
        });
    }

    fn emit(&self, kind: AgentEventKind) {
        // No subscribers is fine
        let _ = self.context.events.send(AgentEvent::new(self.key(), kind));
    }
}
