//! `Tool` — the external tool-implementation capability boundary.
//!
//! Out of scope per the runtime spec: filesystem, todo-list, summarization
//! tools etc. are plain `Tool` values supplied by the embedding application.
//! This module only fixes the trait shape the pipeline dispatches against.

use async_trait::async_trait;

use crate::chat_model::ToolDefinition;
use crate::message::ToolResult;
use crate::state::State;

/// A named, schema-described function the LLM may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn definition(&self) -> ToolDefinition;

    /// Execute the call. `state` is a read-only snapshot taken before the
    /// batch of concurrent tool calls in this turn started; tools that need
    /// to mutate state return a `StateDelta` via `ToolResult::processed_content`
    /// instead of mutating in place.
    async fn execute(&self, call_id: &str, arguments: serde_json::Value, state: &State) -> ToolResult;
}
