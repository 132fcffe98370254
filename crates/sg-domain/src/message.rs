//! Conversation message model — tagged union over `{user, assistant, system,
//! tool}`, plus the user-facing `DisplayMessage` projection.
//!
//! Provider-agnostic: a `ChatModel` implementation translates to/from its
//! own wire format at the boundary, never inside the kernel.

use serde::{Deserialize, Serialize};

use crate::interrupt::InterruptSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// One requested tool invocation, parsed out of an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_text: Option<String>,
}

/// Structured payload a tool can return alongside its opaque text content.
/// Distinct from `content`: the LLM only ever sees `content`; `processed`
/// is consumed by the pipeline (state deltas, interrupt signals).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ProcessedContent {
    #[serde(rename = "state_delta")]
    StateDelta(crate::state::StateDelta),
    #[serde(rename = "interrupt_signal")]
    Interrupt(InterruptSignal),
}

/// Outcome of one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    /// Opaque text sent back to the LLM.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_content: Option<ProcessedContent>,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            processed_content: None,
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: message.into(),
            processed_content: None,
            is_error: true,
        }
    }

    pub fn with_processed(mut self, processed: ProcessedContent) -> Self {
        self.processed_content = Some(processed);
        self
    }
}

/// A single message in `State.messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn assistant_with_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            tool_calls,
            tool_results: Vec::new(),
        }
    }

    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::Tool,
            text: String::new(),
            tool_calls: Vec::new(),
            tool_results: results,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DisplayMessage — UI-oriented projection, append-only, stable sequence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DisplayItem {
    #[serde(rename = "text")]
    Text { sequence: u32, text: String },
    #[serde(rename = "thinking")]
    Thinking { sequence: u32, text: String },
    #[serde(rename = "tool_call")]
    ToolCall {
        sequence: u32,
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        sequence: u32,
        call_id: String,
        content: String,
        is_error: bool,
    },
}

impl DisplayItem {
    pub fn sequence(&self) -> u32 {
        match self {
            DisplayItem::Text { sequence, .. }
            | DisplayItem::Thinking { sequence, .. }
            | DisplayItem::ToolCall { sequence, .. }
            | DisplayItem::ToolResult { sequence, .. } => *sequence,
        }
    }
}

/// A `Message` expanded into one or more `DisplayItem`s for a UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayMessage {
    pub role: Role,
    pub items: Vec<DisplayItem>,
}

impl DisplayMessage {
    /// Project a `Message` into its display items. A single message expands
    /// into one item per text/tool-call/tool-result component, numbered by
    /// a stable `sequence` local to this message.
    pub fn from_message(msg: &Message) -> Self {
        let mut items = Vec::new();
        let mut seq = 0u32;

        if !msg.text.is_empty() {
            items.push(DisplayItem::Text {
                sequence: seq,
                text: msg.text.clone(),
            });
            seq += 1;
        }

        for tc in &msg.tool_calls {
            items.push(DisplayItem::ToolCall {
                sequence: seq,
                call_id: tc.call_id.clone(),
                name: tc.name.clone(),
                arguments: tc.arguments.clone(),
            });
            seq += 1;
        }

        for tr in &msg.tool_results {
            items.push(DisplayItem::ToolResult {
                sequence: seq,
                call_id: tr.call_id.clone(),
                content: tr.content.clone(),
                is_error: tr.is_error,
            });
            seq += 1;
        }

        Self {
            role: msg.role,
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_message_text_only_gets_one_item() {
        let msg = Message::assistant("hello");
        let display = DisplayMessage::from_message(&msg);
        assert_eq!(display.items.len(), 1);
        assert_eq!(display.items[0].sequence(), 0);
    }

    #[test]
    fn display_message_sequence_is_stable_across_components() {
        let msg = Message::assistant_with_tool_calls(
            "checking",
            vec![ToolCall {
                call_id: "c1".into(),
                name: "search".into(),
                arguments: serde_json::json!({}),
                display_text: None,
            }],
        );
        let display = DisplayMessage::from_message(&msg);
        assert_eq!(display.items.len(), 2);
        assert_eq!(display.items[0].sequence(), 0);
        assert_eq!(display.items[1].sequence(), 1);
    }

    #[test]
    fn display_message_empty_text_and_no_calls_is_empty() {
        let msg = Message::tool_results(vec![]);
        let display = DisplayMessage::from_message(&msg);
        assert!(display.items.is_empty());
    }

    #[test]
    fn tool_result_ok_is_not_error() {
        let r = ToolResult::ok("c1", "search", "found it");
        assert!(!r.is_error);
        assert_eq!(r.content, "found it");
    }

    #[test]
    fn tool_result_error_sets_flag() {
        let r = ToolResult::error("c1", "search", "boom");
        assert!(r.is_error);
    }
}
