//! Per-agent publish/subscribe event fan-out.
//!
//! Same broadcast-per-id map shape as `TaskStore`
//! (`crates/gateway/src/runtime/tasks.rs`) and `StreamEvent`'s
//! tagged-enum-over-broadcast pattern (`crates/domain/src/stream.rs`),
//! generalized to two topics per agent (main + debug) instead of one per
//! task.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use sg_domain::{ChatDelta, DisplayItem, Message, Status, Todo, TokenUsage};

const CHANNEL_CAPACITY: usize = 256;

/// Reason a worker shut down, carried on the terminal `AgentShutdown` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    Manual,
    Inactivity,
    NoViewers,
    Crash,
    NodeStop,
}

/// Unified lifecycle stage for one tool call, published at the start and
/// end of its execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolLifecycle {
    Executing,
    Completed,
    Failed,
}

/// Minimal description of a tool call, carried on `tool_call_identified`
/// and `tool_execution_update` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub call_id: String,
    pub name: String,
}

/// The closed set of main-topic event kinds. Additions here are
/// backward-compatible; existing variants are stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    StatusChanged { new_status: Status, detail: Option<String> },
    LlmDeltas { deltas: Vec<ChatDelta> },
    LlmMessage { message: Message },
    LlmTokenUsage { usage: TokenUsage },
    ToolCallIdentified { tool_info: ToolInfo },
    ToolExecutionUpdate { stage: ToolLifecycle, tool_info: ToolInfo },
    DisplayMessageSaved { item: DisplayItem },
    DisplayMessagesBatchSaved { items: Vec<DisplayItem> },
    TodosUpdated { todos: Vec<Todo> },
    StateRestored,
    NodeTransferring { info: String },
    NodeTransferred { info: String },
    AgentShutdown { reason: ShutdownReason },
}

/// Envelope published on an agent's main topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub agent: String,
    pub payload: Payload,
}

/// Envelope published on an agent's debug topic — wraps an arbitrary
/// JSON-serializable inner value (full state snapshots, per-middleware
/// action traces).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugEnvelope {
    pub agent: String,
    pub inner: serde_json::Value,
}

struct Topic {
    main: broadcast::Sender<Envelope>,
    debug: broadcast::Sender<DebugEnvelope>,
}

/// Per-agent main/debug broadcast topics. Delivery is best-effort:
/// publishing when there are no subscribers is not an error, and a slow
/// subscriber that lags is simply dropped by `broadcast`'s ring buffer —
/// it never blocks the publisher.
#[derive(Default)]
pub struct EventBus {
    topics: RwLock<HashMap<String, Topic>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic_for(&self, agent_id: &str) -> (broadcast::Sender<Envelope>, broadcast::Sender<DebugEnvelope>) {
        if let Some(topic) = self.topics.read().get(agent_id) {
            return (topic.main.clone(), topic.debug.clone());
        }
        let mut topics = self.topics.write();
        let topic = topics.entry(agent_id.to_string()).or_insert_with(|| Topic {
            main: broadcast::channel(CHANNEL_CAPACITY).0,
            debug: broadcast::channel(CHANNEL_CAPACITY).0,
        });
        (topic.main.clone(), topic.debug.clone())
    }

    pub fn publish(&self, agent_id: &str, payload: Payload) {
        let (main, _) = self.topic_for(agent_id);
        let envelope = Envelope {
            agent: agent_id.to_string(),
            payload,
        };
        // A `send` error just means nobody is listening right now.
        let _ = main.send(envelope);
    }

    pub fn publish_debug(&self, agent_id: &str, inner: serde_json::Value) {
        let (_, debug) = self.topic_for(agent_id);
        let _ = debug.send(DebugEnvelope {
            agent: agent_id.to_string(),
            inner,
        });
    }

    pub fn subscribe(&self, agent_id: &str) -> broadcast::Receiver<Envelope> {
        self.topic_for(agent_id).0.subscribe()
    }

    pub fn subscribe_debug(&self, agent_id: &str) -> broadcast::Receiver<DebugEnvelope> {
        self.topic_for(agent_id).1.subscribe()
    }

    /// Drop the topic entirely (called after `agent_shutdown` has been
    /// published and no further events will be produced for this agent).
    pub fn remove(&self, agent_id: &str) {
        self.topics.write().remove(agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_does_not_error() {
        let bus = EventBus::new();
        bus.publish(
            "a1",
            Payload::StatusChanged {
                new_status: Status::Running,
                detail: None,
            },
        );
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("a1");
        bus.publish(
            "a1",
            Payload::StatusChanged {
                new_status: Status::Idle,
                detail: None,
            },
        );
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.agent, "a1");
        assert!(matches!(envelope.payload, Payload::StatusChanged { new_status: Status::Idle, .. }));
    }

    #[tokio::test]
    async fn main_and_debug_topics_are_independent() {
        let bus = EventBus::new();
        let mut main_rx = bus.subscribe("a1");
        let mut debug_rx = bus.subscribe_debug("a1");

        bus.publish_debug("a1", serde_json::json!({"trace": "x"}));
        assert!(debug_rx.recv().await.is_ok());
        assert!(main_rx.try_recv().is_err());
    }

    #[test]
    fn remove_drops_topic_so_new_subscribe_starts_fresh() {
        let bus = EventBus::new();
        let _rx = bus.subscribe("a1");
        bus.remove("a1");
        // A fresh subscribe after remove gets a brand new channel with no
        // buffered history; this just exercises that it doesn't panic.
        let _rx2 = bus.subscribe("a1");
    }
}
