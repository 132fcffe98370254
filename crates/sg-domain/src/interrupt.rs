//! Interrupt model — human-in-the-loop pauses and sub-agent interrupt
//! propagation.

use serde::{Deserialize, Serialize};

/// One tool call awaiting a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub allowed_decisions: Vec<DecisionKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Approve,
    Edit,
    Reject,
}

/// The decision an operator makes for one pending `ActionRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Edit {
        arguments: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
    },
    Reject {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl Decision {
    pub fn kind(&self) -> DecisionKind {
        match self {
            Decision::Approve => DecisionKind::Approve,
            Decision::Edit { .. } => DecisionKind::Edit,
            Decision::Reject { .. } => DecisionKind::Reject,
        }
    }
}

/// A pause: one "current" HITL or sub-agent interrupt, carrying whatever
/// data the caller needs to render/decide it, plus a FIFO of siblings
/// from the same LLM turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptData {
    pub action_requests: Vec<ActionRequest>,
    #[serde(default)]
    pub sub_agent_id: Option<String>,
    #[serde(default)]
    pub subagent_type: Option<String>,
    /// The `call_id` of the parent's `task` tool call this interrupt
    /// surfaced through, so `resume` can address the right sub-agent tool
    /// call. Unset for a plain HITL interrupt on the worker's own tools.
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub pending_interrupts: Vec<InterruptData>,
}

impl InterruptData {
    pub fn hitl(action_requests: Vec<ActionRequest>) -> Self {
        Self {
            action_requests,
            sub_agent_id: None,
            subagent_type: None,
            tool_call_id: None,
            pending_interrupts: Vec::new(),
        }
    }

    /// Pop the first pending interrupt and make it current, returning
    /// whatever replaced `self`. `None` means nothing pending.
    pub fn advance(&mut self) -> bool {
        if self.pending_interrupts.is_empty() {
            return false;
        }
        let next = self.pending_interrupts.remove(0);
        *self = next;
        true
    }
}

/// Embedded in a `ToolResult.processed_content` by the `task` tool to lift a
/// sub-agent's pause through the pipeline without exceptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptSignal {
    pub kind: InterruptSignalKind,
    pub sub_agent_id: String,
    pub subagent_type: String,
    pub interrupt_data: InterruptData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptSignalKind {
    SubagentHitl,
}
