//! Optional persistence callbacks invoked by `AgentWorker` at well-defined
//! lifecycle points.
//!
//! A plain trait boundary the embedding application implements against its
//! own storage (the same shape as `TaskStore`/`Task` records in
//! `crates/gateway/src/runtime/tasks.rs`), called best-effort from the
//! runtime and never allowed to affect it.

use async_trait::async_trait;

use sg_domain::{DisplayItem, Result, State};

/// The lifecycle point a persistence call was made from. Never surfaced to
/// the embedding app as anything but context for logging/storage keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceContext {
    OnCompletion,
    OnError,
    OnInterrupt,
    OnTitleGenerated,
    OnShutdown,
}

/// Serialize/restore a whole `State`. A failure here is logged by the
/// worker and never propagated to command handling.
#[async_trait]
pub trait AgentPersistence: Send + Sync {
    async fn persist(&self, agent_id: &str, state: &State, context: PersistenceContext) -> Result<()>;

    async fn load(&self, agent_id: &str) -> Result<Option<State>>;
}

/// Persist the user-facing projection and tool execution status, separate
/// from whole-state snapshots so a UI can resume rendering without
/// deserializing the full conversation.
#[async_trait]
pub trait DisplayMessagePersistence: Send + Sync {
    async fn save_message(&self, agent_id: &str, item: &DisplayItem) -> Result<()>;

    async fn update_tool_status(&self, agent_id: &str, call_id: &str, is_error: bool) -> Result<()>;
}

/// The two persistence hooks a worker may be configured with, bundled so
/// `AgentWorker::spawn` takes one optional argument instead of two.
#[derive(Clone, Default)]
pub struct PersistenceHooks {
    pub agent: Option<std::sync::Arc<dyn AgentPersistence>>,
    pub display: Option<std::sync::Arc<dyn DisplayMessagePersistence>>,
}

impl PersistenceHooks {
    pub fn none() -> Self {
        Self::default()
    }

    /// Run `persist`, logging and discarding any failure.
    pub async fn persist(&self, agent_id: &str, state: &State, context: PersistenceContext) {
        if let Some(agent_persistence) = &self.agent {
            if let Err(err) = agent_persistence.persist(agent_id, state, context).await {
                tracing::warn!(agent_id, ?context, error = %err, "state persistence failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct RecordingPersistence {
        calls: Mutex<Vec<PersistenceContext>>,
    }

    #[async_trait]
    impl AgentPersistence for RecordingPersistence {
        async fn persist(&self, _agent_id: &str, _state: &State, context: PersistenceContext) -> Result<()> {
            self.calls.lock().push(context);
            Ok(())
        }

        async fn load(&self, _agent_id: &str) -> Result<Option<State>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn persist_failure_is_swallowed_not_propagated() {
        struct Failing;

        #[async_trait]
        impl AgentPersistence for Failing {
            async fn persist(&self, _agent_id: &str, _state: &State, _context: PersistenceContext) -> Result<()> {
                Err(sg_domain::Error::Persistence("disk full".into()))
            }

            async fn load(&self, _agent_id: &str) -> Result<Option<State>> {
                Ok(None)
            }
        }

        let hooks = PersistenceHooks { agent: Some(Arc::new(Failing)), display: None };
        hooks.persist("a1", &State::new("a1"), PersistenceContext::OnCompletion).await;
    }

    #[tokio::test]
    async fn persist_records_context_on_success() {
        let recorder = Arc::new(RecordingPersistence { calls: Mutex::new(Vec::new()) });
        let hooks = PersistenceHooks { agent: Some(recorder.clone()), display: None };
        hooks.persist("a1", &State::new("a1"), PersistenceContext::OnShutdown).await;
        assert_eq!(recorder.calls.lock().len(), 1);
    }
}
