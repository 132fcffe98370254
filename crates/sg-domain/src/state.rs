//! Mutable runtime data owned by exactly one worker: messages, todos,
//! metadata, and (while paused) the interrupt record.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::interrupt::InterruptData;
use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
}

/// Mutable conversation state. Deep-copyable and JSON-serializable modulo
/// `metadata`'s dynamic-typed values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub agent_id: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub todos: Vec<Todo>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_data: Option<InterruptData>,
}

impl State {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            messages: Vec::new(),
            todos: Vec::new(),
            metadata: HashMap::new(),
            interrupt_data: None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt_data.is_some()
    }

    /// Merge a delta into this state: right-wins, chronological order.
    /// Messages append; metadata keys from `delta` overwrite matching keys
    /// in `self`.
    pub fn apply_delta(&mut self, delta: StateDelta) {
        self.messages.extend(delta.messages);
        if let Some(todos) = delta.todos {
            self.todos = todos;
        }
        for (k, v) in delta.metadata {
            self.metadata.insert(k, v);
        }
    }
}

/// A partial update to `State`, as returned by a tool's `processed_content`.
/// Field-wise right-wins merge: `messages` append, `metadata` overwrites.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDelta {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todos: Option<Vec<Todo>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StateDelta {
    pub fn metadata_only(metadata: HashMap<String, serde_json::Value>) -> Self {
        Self {
            messages: Vec::new(),
            todos: None,
            metadata,
        }
    }
}

/// Merge a chronologically-ordered run of deltas into `state`, right-wins,
/// in the order given. This is the single implementation of the merge
/// convention called out as an open question in the design notes: deltas
/// are folded in the order they were produced, never reversed.
pub fn merge_deltas(state: &mut State, deltas: Vec<StateDelta>) {
    for delta in deltas {
        state.apply_delta(delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_delta_appends_messages() {
        let mut state = State::new("a1");
        state.messages.push(Message::user("hi"));

        let delta = StateDelta {
            messages: vec![Message::assistant("hello")],
            todos: None,
            metadata: HashMap::new(),
        };
        state.apply_delta(delta);

        assert_eq!(state.messages.len(), 2);
    }

    #[test]
    fn apply_delta_metadata_right_wins() {
        let mut state = State::new("a1");
        state.metadata.insert("k".into(), serde_json::json!("old"));

        let mut meta = HashMap::new();
        meta.insert("k".into(), serde_json::json!("new"));
        state.apply_delta(StateDelta::metadata_only(meta));

        assert_eq!(state.metadata.get("k"), Some(&serde_json::json!("new")));
    }

    #[test]
    fn merge_deltas_preserves_chronological_right_wins() {
        let mut state = State::new("a1");
        let mut m1 = HashMap::new();
        m1.insert("x".into(), serde_json::json!(1));
        let mut m2 = HashMap::new();
        m2.insert("x".into(), serde_json::json!(2));

        merge_deltas(
            &mut state,
            vec![
                StateDelta::metadata_only(m1),
                StateDelta::metadata_only(m2),
            ],
        );

        // Later delta in the chronological list wins.
        assert_eq!(state.metadata.get("x"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn is_interrupted_reflects_interrupt_data() {
        let mut state = State::new("a1");
        assert!(!state.is_interrupted());
        state.interrupt_data = Some(InterruptData::hitl(vec![]));
        assert!(state.is_interrupted());
    }
}
