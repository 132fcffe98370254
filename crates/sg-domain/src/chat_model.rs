//! `ChatModel` — the external LLM-provider capability boundary.
//!
//! Out of scope per the runtime spec: no opinion on wire protocol. This
//! module only fixes the trait shape the pipeline calls against; concrete
//! bindings (chat-completion RPC, streaming decoder, token accounting) live
//! outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{Message, ToolCall};

/// Tool schema advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// One streamed token delta, emitted to `EventBus` as `llm_deltas`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatDelta {
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The complete outcome of one LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

/// A chat-completion capability. Implementations own streaming, retries,
/// and wire-level details; the pipeline only sees `complete`.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier used in logs/events (e.g. `"openai/gpt-4o"`).
    fn id(&self) -> &str;

    /// Run one completion. Implementations should emit `on_delta` for every
    /// streamed chunk before returning the aggregated `ChatResponse`.
    async fn complete(
        &self,
        request: &ChatRequest,
        on_delta: &mut (dyn FnMut(ChatDelta) + Send),
    ) -> Result<ChatResponse>;
}
