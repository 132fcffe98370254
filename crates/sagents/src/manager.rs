//! `AgentManager` — the agent-lifecycle façade embedding applications
//! drive instead of wiring `Placement`/`AgentWorker`/`EventBus` by hand.
//!
//! Same "one type bundles registry + event bus + bookkeeping" shape as
//! `AgentRuntime` (`crates/gateway/src/runtime/agent.rs`), generalized from
//! a single in-process map to any `Registry` backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sg_domain::{Context, Error, Result, State, Status};
use sg_registry::{ClusteredRegistry, Handle, Placement, RegisterOutcome, Registry, RegistryKey};
use sg_runtime::{AgentConfig, AgentWorker, EventBus, Payload, PersistenceHooks, ShutdownReason};

/// What `start_agent` actually did: registered a brand new worker, or found
/// one already running under the same id and handed back its handle.
pub enum StartOutcome {
    Started(AgentWorker),
    AlreadyStarted(AgentWorker),
}

impl StartOutcome {
    pub fn handle(&self) -> &AgentWorker {
        match self {
            StartOutcome::Started(w) | StartOutcome::AlreadyStarted(w) => w,
        }
    }

    pub fn already_started(&self) -> bool {
        matches!(self, StartOutcome::AlreadyStarted(_))
    }
}

/// Options controlling `start_agent`. `state` seeds the worker directly;
/// when absent and `persistence` carries an `AgentPersistence`, a prior
/// snapshot is loaded and `StateRestored` is published once found.
#[derive(Default)]
pub struct StartOptions {
    pub state: Option<State>,
    pub runtime_config: sg_registry::RuntimeConfig,
    pub persistence: PersistenceHooks,
    pub context: Context,
}

/// Options controlling `stop_agent`.
pub struct StopOptions {
    pub reason: ShutdownReason,
    pub timeout: Duration,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            reason: ShutdownReason::Manual,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Point-in-time snapshot of one agent's status, for dashboards/APIs that
/// shouldn't need to pull a full `State` just to render a list.
pub struct AgentInfo {
    pub id: String,
    pub status: Status,
    pub message_count: usize,
    pub has_interrupt: bool,
    pub uptime: Duration,
}

/// Manages the `AgentWorker`s live on this node: starts, stops, lists, and
/// reports on them through a `Registry` backend. `R` is fixed per manager
/// instance (`LocalRegistry` for a single process, `ClusteredRegistry` for
/// a multi-node deployment via [`AgentManager::new_clustered`]).
pub struct AgentManager<R: Registry + ?Sized> {
    node_id: String,
    placement: Placement<R>,
    event_bus: Arc<EventBus>,
    started_at: parking_lot::RwLock<HashMap<String, Instant>>,
}

impl<R: Registry + ?Sized> AgentManager<R> {
    pub fn new(node_id: impl Into<String>, registry: Arc<R>, event_bus: Arc<EventBus>) -> Self {
        Self {
            node_id: node_id.into(),
            placement: Placement::new(registry),
            event_bus,
            started_at: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    fn key_for(agent_id: &str) -> RegistryKey {
        RegistryKey::AgentWorker(agent_id.to_string())
    }

    /// Start an agent under `config.agent_id`, or return the existing
    /// worker if one is already registered for that id (idempotent restart
    /// protection — mirrors `Placement::start_agent`'s own semantics one
    /// level up, now returning a typed, already-downcast `AgentWorker`).
    pub async fn start_agent(&self, config: AgentConfig, opts: StartOptions) -> Result<StartOutcome> {
        let agent_id = config.agent_id.clone();
        let key = Self::key_for(&agent_id);

        let state = match opts.state {
            Some(state) => state,
            None => match &opts.persistence.agent {
                Some(persistence) => match persistence.load(&agent_id).await? {
                    Some(restored) => {
                        self.event_bus.publish(&agent_id, Payload::StateRestored);
                        restored
                    }
                    None => State::new(agent_id.clone()),
                },
                None => State::new(agent_id.clone()),
            },
        };

        let worker = AgentWorker::spawn(config, state, self.event_bus.clone(), opts.runtime_config, opts.persistence, opts.context)?;
        let handle = Handle::new(self.node_id.clone(), Arc::new(worker.clone()));

        let (outcome, handle) = self.placement.start_agent(key, handle).await?;
        let placed = handle
            .downcast::<AgentWorker>()
            .ok_or_else(|| Error::Other(format!("registry handle for '{agent_id}' is not an AgentWorker")))?;

        match outcome {
            RegisterOutcome::Registered => {
                self.started_at.write().insert(agent_id, Instant::now());
                Ok(StartOutcome::Started((*placed).clone()))
            }
            RegisterOutcome::AlreadyStarted => {
                // Our freshly-spawned worker lost the race; shut it down so
                // it doesn't linger unreferenced.
                if placed.agent_id() != worker.agent_id() {
                    worker.shutdown(ShutdownReason::Manual).await;
                }
                Ok(StartOutcome::AlreadyStarted((*placed).clone()))
            }
        }
    }

    /// Stop the agent registered under `id`, if any. A missing id is not
    /// an error: stopping is idempotent from the caller's perspective.
    pub async fn stop_agent(&self, id: &str, opts: StopOptions) -> Result<()> {
        let key = Self::key_for(id);
        let Some(handle) = self.placement.registry().via(&key) else {
            return Ok(());
        };
        let Some(worker) = handle.downcast::<AgentWorker>() else {
            return Err(Error::Other(format!("registry handle for '{id}' is not an AgentWorker")));
        };

        let shutdown = worker.shutdown(opts.reason);
        if tokio::time::timeout(opts.timeout, shutdown).await.is_err() {
            tracing::warn!(agent_id = id, "agent shutdown exceeded timeout; unregistering anyway");
        }
        self.placement.stop_agent(&key);
        self.started_at.write().remove(id);
        Ok(())
    }

    pub fn list_agents(&self) -> Vec<String> {
        self.placement
            .registry()
            .keys("agent_worker")
            .into_iter()
            .map(|key| key.identifier().to_string())
            .collect()
    }

    pub fn count_agents(&self) -> usize {
        self.list_agents().len()
    }

    pub async fn agent_info(&self, id: &str) -> Result<AgentInfo> {
        let key = Self::key_for(id);
        let handle = self
            .placement
            .registry()
            .via(&key)
            .ok_or_else(|| Error::NotFound(format!("agent '{id}'")))?;
        let worker = handle
            .downcast::<AgentWorker>()
            .ok_or_else(|| Error::Other(format!("registry handle for '{id}' is not an AgentWorker")))?;

        let status = worker.status().await?;
        let state = worker.export_state().await?;
        let uptime = self
            .started_at
            .read()
            .get(id)
            .map(|start| start.elapsed())
            .unwrap_or_default();

        Ok(AgentInfo {
            id: id.to_string(),
            status,
            message_count: state.messages.len(),
            has_interrupt: state.interrupt_data.is_some(),
            uptime,
        })
    }
}

impl AgentManager<ClusteredRegistry> {
    /// Build a manager over a `ClusteredRegistry`, wiring its transfer
    /// observer to publish `NodeTransferring`/`NodeTransferred` on the
    /// event bus whenever `converge()` moves a key's ownership away from
    /// this node.
    pub fn new_clustered(node_id: impl Into<String>, registry: Arc<ClusteredRegistry>, event_bus: Arc<EventBus>) -> Self {
        let node_id = node_id.into();
        let observer_bus = event_bus.clone();
        let observer_node = node_id.clone();
        registry.on_transfer(Arc::new(move |key, old_owner, new_owner| {
            let agent_id = key.identifier().to_string();
            let info = format!("{key} moved from {old_owner} to {new_owner}");
            if old_owner == observer_node {
                observer_bus.publish(&agent_id, Payload::NodeTransferring { info: info.clone() });
            }
            if new_owner == observer_node || old_owner == observer_node {
                observer_bus.publish(&agent_id, Payload::NodeTransferred { info });
            }
        }));
        Self::new(node_id, registry, event_bus)
    }
}
