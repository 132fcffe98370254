//! Middleware capability set.
//!
//! Same per-agent config assembly shape as `AgentContext`/`AgentManager`
//! (`crates/gateway/src/runtime/agent.rs`), represented as a flat table of
//! hooks rather than deep inheritance — every hook here defaults to a
//! no-op/pass-through so a middleware only overrides what it needs.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::Value;

use sg_domain::{InterruptData, Result, State, Tool};

use crate::event_bus::Payload;

/// Outcome of `after_model`: either a rewritten state, or a pause request
/// carrying the interrupt data the worker should surface.
pub enum AfterModelOutcome {
    Ok(State),
    Interrupt(State, InterruptData),
}

/// An optional plug-in contributing prompts, tools, callbacks, and hooks
/// at well-defined points in the pipeline. All methods default to a
/// no-op/pass-through; implementors override only what they need.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Default instance identity, used when a `MiddlewareEntry` doesn't
    /// override it. Multiple instances of the same middleware type coexist
    /// by giving each a distinct `MiddlewareEntry.id`.
    fn id(&self) -> &str;

    /// Downcast hook so `AgentWorker` can recover a concrete middleware
    /// type (e.g. `SubAgent`) from the flat `Vec<MiddlewareEntry>` without
    /// the worker depending on every middleware type by name. Always
    /// implemented as `{ self }`.
    fn as_any(&self) -> &dyn std::any::Any;

    /// One-time config validation, run once per `AgentConfig` assembly.
    /// Unlike the other hooks, a failure here aborts startup rather than
    /// being caught and passed through.
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Contribution to the assembled system prompt.
    fn system_prompt(&self) -> Vec<String> {
        Vec::new()
    }

    /// Tools this middleware exposes, appended after user-supplied tools.
    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        Vec::new()
    }

    /// Observability hook: called for every event this agent publishes.
    /// Never blocks the worker and never fails the pipeline.
    fn on_event(&self, _agent_id: &str, _payload: &Payload) {}

    /// Pre-call rewrite.
    async fn before_model(&self, state: State) -> Result<State> {
        Ok(state)
    }

    /// Post-call rewrite, or an interrupt request.
    async fn after_model(&self, state: State) -> Result<AfterModelOutcome> {
        Ok(AfterModelOutcome::Ok(state))
    }

    /// Receive a message this middleware's own background task sent via
    /// `AgentWorker::send_middleware_message`.
    async fn handle_message(&self, _msg: Value, state: State) -> Result<State> {
        Ok(state)
    }

    /// One-shot hook invoked when the worker starts.
    async fn on_server_start(&self, state: State) -> Result<State> {
        Ok(state)
    }

    /// Inject context for a sub-agent fork. Called in list order by
    /// `Context::fork_with_middleware`.
    fn on_fork_context(&self, ctx: HashMap<String, Value>) -> HashMap<String, Value> {
        ctx
    }
}

/// One configured middleware slot: an id paired with the concrete
/// `Arc<dyn Middleware>` instance, its config baked in at construction
/// rather than carried as a separate reflective handle.
#[derive(Clone)]
pub struct MiddlewareEntry {
    pub id: String,
    pub middleware: Arc<dyn Middleware>,
}

impl MiddlewareEntry {
    pub fn new(middleware: Arc<dyn Middleware>) -> Self {
        Self {
            id: middleware.id().to_string(),
            middleware,
        }
    }

    pub fn with_id(middleware: Arc<dyn Middleware>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            middleware,
        }
    }
}

/// Run `before_model` across `entries` in list order. The first hook
/// returning `Err` short-circuits the rest. A *panicking* hook is caught
/// and treated as pass-through instead, distinct from an intentional `Err`.
pub async fn run_before_model(entries: &[MiddlewareEntry], mut state: State) -> Result<State> {
    for entry in entries {
        let fut = entry.middleware.before_model(state.clone());
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(next)) => state = next,
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                tracing::warn!(middleware_id = %entry.id, "before_model panicked, passing state through unchanged");
            }
        }
    }
    Ok(state)
}

/// Run `after_model` across `entries` in *reverse* list order (sandwich).
pub async fn run_after_model(entries: &[MiddlewareEntry], mut state: State) -> Result<AfterModelOutcome> {
    for entry in entries.iter().rev() {
        let fut = entry.middleware.after_model(state.clone());
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(AfterModelOutcome::Ok(next))) => state = next,
            Ok(Ok(AfterModelOutcome::Interrupt(next, data))) => return Ok(AfterModelOutcome::Interrupt(next, data)),
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                tracing::warn!(middleware_id = %entry.id, "after_model panicked, passing state through unchanged");
            }
        }
    }
    Ok(AfterModelOutcome::Ok(state))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PassThrough;

    #[async_trait]
    impl Middleware for PassThrough {
        fn id(&self) -> &str {
            "pass_through"
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    struct Prefixer(&'static str);

    #[async_trait]
    impl Middleware for Prefixer {
        fn id(&self) -> &str {
            self.0
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        async fn before_model(&self, mut state: State) -> Result<State> {
            state.metadata.insert(self.0.to_string(), serde_json::json!(true));
            Ok(state)
        }
    }

    struct Failing;

    #[async_trait]
    impl Middleware for Failing {
        fn id(&self) -> &str {
            "failing"
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        async fn before_model(&self, _state: State) -> Result<State> {
            Err(sg_domain::Error::Other("boom".into()))
        }
    }

    #[tokio::test]
    async fn before_model_runs_in_list_order() {
        let entries = vec![
            MiddlewareEntry::new(Arc::new(Prefixer("a"))),
            MiddlewareEntry::new(Arc::new(Prefixer("b"))),
        ];
        let state = State::new("agent1");
        let result = run_before_model(&entries, state).await.unwrap();
        assert!(result.metadata.contains_key("a"));
        assert!(result.metadata.contains_key("b"));
    }

    #[tokio::test]
    async fn before_model_short_circuits_on_error() {
        let entries = vec![
            MiddlewareEntry::new(Arc::new(Failing)),
            MiddlewareEntry::new(Arc::new(Prefixer("never"))),
        ];
        let state = State::new("agent1");
        let result = run_before_model(&entries, state).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn after_model_default_is_pass_through() {
        let entries = vec![MiddlewareEntry::new(Arc::new(PassThrough))];
        let state = State::new("agent1");
        let outcome = run_after_model(&entries, state).await.unwrap();
        assert!(matches!(outcome, AfterModelOutcome::Ok(_)));
    }
}
