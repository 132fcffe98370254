//! `AgentWorker` — single-writer owner of one `(AgentConfig, State)` pair.
//!
//! `run_turn` (`crates/gateway/src/runtime/turn.rs`) spawns the turn as its
//! own task and streams results back over a channel; `SessionLockMap`
//! (`crates/gateway/src/runtime/session_lock.rs`) gives one-thing-at-a-time-
//! per-agent discipline. Here the mailbox itself (an
//! `mpsc::Receiver<Command>` drained by a single loop) is what serializes
//! commands, rather than a semaphore guarding re-entrant calls.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sg_domain::{Context, Decision, DisplayItem, DisplayMessage, Error, Message, Result, State, Status};
use sg_registry::RuntimeConfig;

use crate::config::AgentConfig;
use crate::event_bus::{DebugEnvelope, Envelope, EventBus, Payload, ShutdownReason};
use crate::persistence::{PersistenceContext, PersistenceHooks};
use crate::pipeline::{ExecutionPipeline, PipelineChain, RunOutcome};

/// Outcome of one pipeline run, carried back into the actor's own mailbox
/// so state mutation still only ever happens on the serial loop.
struct PipelineFinished {
    chain: PipelineChain,
    outcome: RunOutcome,
}

enum Command {
    AddMessage { message: Message, reply: oneshot::Sender<Result<()>> },
    Execute { reply: oneshot::Sender<Result<()>> },
    Cancel { reply: oneshot::Sender<Result<()>> },
    Resume { decisions: Vec<Decision>, reply: oneshot::Sender<Result<()>> },
    ExportState { reply: oneshot::Sender<State> },
    ExportStatus { reply: oneshot::Sender<Status> },
    UpdateAgentAndState { config: Arc<AgentConfig>, state: State, reply: oneshot::Sender<Result<()>> },
    SendMiddlewareMessage { middleware_id: String, msg: serde_json::Value, reply: oneshot::Sender<Result<()>> },
    PipelineFinished(PipelineFinished),
    Shutdown { reason: ShutdownReason },
}

impl Command {
    /// Whether this command counts as activity for the inactivity timer.
    /// State-access-only reads count too.
    fn is_activity(&self) -> bool {
        !matches!(self, Command::Shutdown { .. })
    }
}

/// Cheaply-clonable handle to a running worker. All mutation goes through
/// `tx`; the handle itself holds no mutable state.
#[derive(Clone)]
pub struct AgentWorker {
    agent_id: String,
    tx: mpsc::Sender<Command>,
    event_bus: Arc<EventBus>,
}

impl AgentWorker {
    /// Start the actor task and return a handle to it. `runtime_config` is
    /// validated here, rejecting a malformed config before a worker task is
    /// ever spawned for it.
    pub fn spawn(
        config: AgentConfig,
        state: State,
        event_bus: Arc<EventBus>,
        runtime_config: RuntimeConfig,
        persistence: PersistenceHooks,
        context: Context,
    ) -> Result<Self> {
        let runtime_config = runtime_config.validate()?;
        let agent_id = config.agent_id.clone();
        let (tx, rx) = mpsc::channel(64);

        let actor = Actor {
            config: Arc::new(config),
            state,
            status: Status::Idle,
            event_bus: event_bus.clone(),
            runtime_config,
            persistence,
            context,
            cancel_token: None,
            pipeline_handle: None,
            self_tx: tx.clone(),
        };
        tokio::spawn(actor.run(rx));

        Ok(Self { agent_id, tx, event_bus })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub async fn add_message(&self, message: Message) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AddMessage { message, reply }, rx).await
    }

    pub async fn execute(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Execute { reply }, rx).await
    }

    pub async fn cancel(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Cancel { reply }, rx).await
    }

    pub async fn resume(&self, decisions: Vec<Decision>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Resume { decisions, reply }, rx).await
    }

    pub async fn export_state(&self) -> Result<State> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::ExportState { reply })
            .await
            .map_err(|_| Error::NotRunning)?;
        rx.await.map_err(|_| Error::NotRunning)
    }

    pub async fn status(&self) -> Result<Status> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::ExportStatus { reply })
            .await
            .map_err(|_| Error::NotRunning)?;
        rx.await.map_err(|_| Error::NotRunning)
    }

    /// Alias for `export_state` — same read-only snapshot under the name
    /// callers expecting a getter would reach for.
    pub async fn get_state(&self) -> Result<State> {
        self.export_state().await
    }

    pub async fn update_agent_and_state(&self, config: AgentConfig, state: State) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(
            Command::UpdateAgentAndState { config: Arc::new(config), state, reply },
            rx,
        )
        .await
    }

    pub async fn send_middleware_message(&self, middleware_id: impl Into<String>, msg: serde_json::Value) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(
            Command::SendMiddlewareMessage { middleware_id: middleware_id.into(), msg, reply },
            rx,
        )
        .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.event_bus.subscribe(&self.agent_id)
    }

    pub fn subscribe_debug(&self) -> broadcast::Receiver<DebugEnvelope> {
        self.event_bus.subscribe_debug(&self.agent_id)
    }

    /// Fan-out helper for tool tasks that only have the worker's id, not a
    /// handle to its mailbox.
    pub fn publish_event_from(&self, payload: Payload) {
        self.event_bus.publish(&self.agent_id, payload);
    }

    pub fn publish_debug_event_from(&self, value: serde_json::Value) {
        self.event_bus.publish_debug(&self.agent_id, value);
    }

    /// Request shutdown with `reason` (manual or any other reason the
    /// embedding app decides applies). Fire-and-forget: the actor emits
    /// `agent_shutdown` and tears itself down without a reply.
    pub async fn shutdown(&self, reason: ShutdownReason) {
        let _ = self.tx.send(Command::Shutdown { reason }).await;
    }

    async fn send(&self, cmd: Command, rx: oneshot::Receiver<Result<()>>) -> Result<()> {
        self.tx.send(cmd).await.map_err(|_| Error::NotRunning)?;
        rx.await.map_err(|_| Error::NotRunning)?
    }
}

struct Actor {
    config: Arc<AgentConfig>,
    state: State,
    status: Status,
    event_bus: Arc<EventBus>,
    runtime_config: RuntimeConfig,
    persistence: PersistenceHooks,
    context: Context,
    cancel_token: Option<CancellationToken>,
    pipeline_handle: Option<JoinHandle<()>>,
    self_tx: mpsc::Sender<Command>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let mut deadline = tokio::time::Instant::now() + self.runtime_config.default_inactivity_timeout;

        loop {
            let sleep = tokio::time::sleep_until(deadline);
            tokio::select! {
                maybe_cmd = rx.recv() => {
                    let Some(cmd) = maybe_cmd else {
                        // All handles dropped; nothing left to serve.
                        return;
                    };
                    if cmd.is_activity() {
                        deadline = tokio::time::Instant::now() + self.runtime_config.default_inactivity_timeout;
                    }
                    if matches!(cmd, Command::Shutdown { .. }) {
                        if let Command::Shutdown { reason } = cmd {
                            self.shutdown(reason).await;
                        }
                        return;
                    }
                    self.handle(cmd).await;
                }
                _ = sleep => {
                    if self.status == Status::Idle {
                        self.shutdown(ShutdownReason::Inactivity).await;
                        return;
                    }
                }
            }
        }
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::AddMessage { message, reply } => {
                let result = self.add_message(message).await;
                let _ = reply.send(result);
            }
            Command::Execute { reply } => {
                let result = self.execute();
                let _ = reply.send(result);
            }
            Command::Cancel { reply } => {
                let result = self.cancel();
                let _ = reply.send(result);
            }
            Command::Resume { decisions, reply } => {
                let result = self.resume(decisions);
                let _ = reply.send(result);
            }
            Command::ExportState { reply } => {
                let _ = reply.send(self.state.clone());
            }
            Command::ExportStatus { reply } => {
                let _ = reply.send(self.status);
            }
            Command::UpdateAgentAndState { config, state, reply } => {
                let result = if self.status == Status::Idle {
                    self.config = config;
                    self.state = state;
                    Ok(())
                } else {
                    Err(Error::NotIdle)
                };
                let _ = reply.send(result);
            }
            Command::SendMiddlewareMessage { middleware_id, msg, reply } => {
                let result = self.send_middleware_message(middleware_id, msg).await;
                let _ = reply.send(result);
            }
            Command::PipelineFinished(finished) => {
                self.apply_pipeline_outcome(finished).await;
            }
            Command::Shutdown { .. } => unreachable!("handled in run() before dispatch"),
        }
    }

    fn emit(&self, payload: Payload) {
        for entry in &self.config.middleware {
            entry.middleware.on_event(&self.config.agent_id, &payload);
        }
        self.event_bus.publish(&self.config.agent_id, payload);
    }

    fn set_status(&mut self, status: Status) {
        self.status = status;
        self.emit(Payload::StatusChanged { new_status: status, detail: None });
    }

    async fn add_message(&mut self, message: Message) -> Result<()> {
        self.state.messages.push(message.clone());
        self.persist_display_messages(std::slice::from_ref(&message)).await;
        if matches!(self.status, Status::Idle) {
            self.spawn_pipeline_task(PipelineEntry::Run)
        } else {
            Ok(())
        }
    }

    /// Project `messages` into `DisplayItem`s, persist each through
    /// `PersistenceHooks::display`, and publish the corresponding events.
    /// Best-effort: persistence failures are logged and swallowed, same as
    /// `PersistenceHooks::persist`.
    async fn persist_display_messages(&self, messages: &[Message]) {
        let mut batch = Vec::new();
        for message in messages {
            for item in DisplayMessage::from_message(message).items {
                if let Some(display_persistence) = &self.persistence.display {
                    if let Err(err) = display_persistence.save_message(&self.config.agent_id, &item).await {
                        tracing::warn!(agent_id = %self.config.agent_id, error = %err, "display message persistence failed");
                    }
                    if let DisplayItem::ToolResult { call_id, is_error, .. } = &item {
                        if let Err(err) = display_persistence
                            .update_tool_status(&self.config.agent_id, call_id, *is_error)
                            .await
                        {
                            tracing::warn!(agent_id = %self.config.agent_id, error = %err, "tool status persistence failed");
                        }
                    }
                }
                self.emit(Payload::DisplayMessageSaved { item: item.clone() });
                batch.push(item);
            }
        }
        if !batch.is_empty() {
            self.emit(Payload::DisplayMessagesBatchSaved { items: batch });
        }
    }

    fn execute(&mut self) -> Result<()> {
        if self.status != Status::Idle {
            return Err(Error::NotIdle);
        }
        self.spawn_pipeline_task(PipelineEntry::Run)
    }

    fn cancel(&mut self) -> Result<()> {
        if self.status != Status::Running {
            return Err(Error::NotRunning);
        }
        if let Some(token) = &self.cancel_token {
            token.cancel();
        }
        Ok(())
    }

    /// When the current interrupt carries a `sub_agent_id` (it originated
    /// from a `task` tool call rather than one of this worker's own HITL
    /// policy matches), route the decisions to that child via `SubAgent`
    /// instead of re-executing them as this agent's own tools.
    fn resume(&mut self, decisions: Vec<Decision>) -> Result<()> {
        if self.status != Status::Interrupted {
            return Err(Error::NotInterrupted);
        }
        match self.state.interrupt_data.as_ref().and_then(|d| d.sub_agent_id.clone()) {
            Some(sub_agent_id) => self.spawn_pipeline_task(PipelineEntry::ResumeSubAgent { sub_agent_id, decisions }),
            None => self.spawn_pipeline_task(PipelineEntry::Resume(decisions)),
        }
    }

    async fn send_middleware_message(&mut self, middleware_id: String, msg: serde_json::Value) -> Result<()> {
        let Some(entry) = self.config.middleware.iter().find(|e| e.id == middleware_id) else {
            return Err(Error::NotFound(format!("middleware '{middleware_id}'")));
        };
        match entry.middleware.handle_message(msg, self.state.clone()).await {
            Ok(state) => {
                self.state = state;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(middleware_id, error = %err, "middleware handle_message failed");
                Ok(())
            }
        }
    }

    /// Captures the `Context` snapshot, runs the pipeline on a cancellable
    /// task, and feeds the result back through the mailbox so the actual
    /// mutation happens on the serial loop.
    fn spawn_pipeline_task(&mut self, entry: PipelineEntry) -> Result<()> {
        self.set_status(Status::Running);

        let token = CancellationToken::new();
        self.cancel_token = Some(token.clone());

        let config = self.config.clone();
        let config_for_subagent = self.config.clone();
        let event_bus = self.event_bus.clone();
        let chain = PipelineChain::new(self.state.clone());
        let ctx_snapshot = self.context.fork();
        let self_tx = self.self_tx.clone();

        let handle = tokio::spawn(async move {
            let pipeline = ExecutionPipeline::new(config, event_bus);
            let ctx = Context::init(ctx_snapshot);
            let should_pause = move || token.is_cancelled();

            let (chain, outcome) = match entry {
                PipelineEntry::Run => pipeline.run(chain, &ctx, &should_pause).await,
                PipelineEntry::Resume(decisions) => pipeline.resume(chain, decisions, &ctx, &should_pause).await,
                PipelineEntry::ResumeSubAgent { sub_agent_id, decisions } => {
                    Self::resume_sub_agent(&pipeline, &config_for_subagent, chain, sub_agent_id, decisions, &ctx, &should_pause).await
                }
            };

            let _ = self_tx.send(Command::PipelineFinished(PipelineFinished { chain, outcome })).await;
        });
        self.pipeline_handle = Some(handle);

        Ok(())
    }

    /// Find the `SubAgent` middleware owning `sub_agent_id`, resume it, and
    /// fold its result back into the parent pipeline as a tool result.
    async fn resume_sub_agent(
        pipeline: &ExecutionPipeline,
        config: &Arc<AgentConfig>,
        mut chain: PipelineChain,
        sub_agent_id: String,
        decisions: Vec<Decision>,
        ctx: &Context,
        should_pause: &crate::pipeline::ShouldPause,
    ) -> (PipelineChain, RunOutcome) {
        let Some(data) = chain.state.interrupt_data.take() else {
            return (chain, RunOutcome::Error(Error::NotInterrupted));
        };

        let subagent = config
            .middleware
            .iter()
            .find_map(|entry| entry.middleware.as_any().downcast_ref::<crate::subagent::SubAgent>());

        let Some(subagent) = subagent else {
            return (chain, RunOutcome::Error(Error::NotFound(format!("no SubAgent middleware owns '{sub_agent_id}'"))));
        };

        let call_id = data.tool_call_id.clone().unwrap_or_else(|| sub_agent_id.clone());
        let result = subagent.resume_task(&call_id, &sub_agent_id, decisions, ctx).await;

        pipeline.resume_with_tool_results(chain, data, vec![result], ctx, should_pause).await
    }

    async fn apply_pipeline_outcome(&mut self, finished: PipelineFinished) {
        self.pipeline_handle = None;
        self.cancel_token = None;
        let prior_message_count = self.state.messages.len();
        let prior_todos = self.state.todos.clone();
        self.state = finished.chain.state;

        let new_messages = self.state.messages[prior_message_count..].to_vec();
        self.persist_display_messages(&new_messages).await;

        if self.state.todos != prior_todos {
            self.emit(Payload::TodosUpdated { todos: self.state.todos.clone() });
        }

        match finished.outcome {
            RunOutcome::Ok { .. } => {
                self.set_status(Status::Idle);
                self.persistence.persist(&self.config.agent_id, &self.state, PersistenceContext::OnCompletion).await;
            }
            RunOutcome::Interrupt(data) => {
                self.state.interrupt_data = Some(data);
                self.set_status(Status::Interrupted);
                self.persistence.persist(&self.config.agent_id, &self.state, PersistenceContext::OnInterrupt).await;
            }
            RunOutcome::Pause => {
                self.set_status(Status::Cancelled);
                self.set_status(Status::Idle);
            }
            RunOutcome::Error(err) => {
                tracing::warn!(agent_id = %self.config.agent_id, error = %err, "pipeline run ended in error");
                self.set_status(Status::Error);
                self.persistence.persist(&self.config.agent_id, &self.state, PersistenceContext::OnError).await;
            }
        }
    }

    async fn shutdown(&mut self, reason: ShutdownReason) {
        self.emit(Payload::AgentShutdown { reason });
        if reason != ShutdownReason::Crash {
            self.persistence.persist(&self.config.agent_id, &self.state, PersistenceContext::OnShutdown).await;
        }
        self.event_bus.remove(&self.config.agent_id);
    }
}

enum PipelineEntry {
    Run,
    Resume(Vec<Decision>),
    ResumeSubAgent { sub_agent_id: String, decisions: Vec<Decision> },
}

/// Presence-based shutdown, optional. When enabled, wraps a worker
/// with a grace timer that fires `cancel`-free shutdown once the viewer
/// count reaches zero while `Status = Idle`, cancelled if a viewer returns
/// before the grace period elapses.
pub async fn watch_presence(worker: AgentWorker, mut viewer_count: watch_presence::Receiver, grace_period: Duration) {
    loop {
        let Ok(count) = viewer_count.recv().await else {
            return;
        };
        if count != 0 {
            continue;
        }
        tokio::select! {
            next = viewer_count.recv() => {
                match next {
                    Ok(c) if c != 0 => continue,
                    Ok(_) => {}
                    Err(_) => return,
                }
            }
            _ = tokio::time::sleep(grace_period) => {
                let _ = worker.cancel().await;
                return;
            }
        }
    }
}

/// Minimal presence channel so `watch_presence` doesn't need to depend on
/// any particular transport; the embedding app drives it from its own
/// connection-tracking.
pub mod watch_presence {
    use tokio::sync::mpsc;

    pub type Sender = mpsc::Sender<usize>;

    pub struct Receiver(pub mpsc::Receiver<usize>);

    impl Receiver {
        pub async fn recv(&mut self) -> Result<usize, ()> {
            self.0.recv().await.ok_or(())
        }
    }

    pub fn channel(capacity: usize) -> (Sender, Receiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Receiver(rx))
    }
}
