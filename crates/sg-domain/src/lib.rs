//! Shared data model and capability traits for the sagents runtime kernel.
//!
//! This crate has no async-runtime opinion beyond the `async_trait` method
//! shapes on `ChatModel`/`Tool` — it is the vocabulary `sg-registry` and
//! `sg-runtime` build on.

pub mod chat_model;
pub mod context;
pub mod error;
pub mod interrupt;
pub mod message;
pub mod state;
pub mod status;
pub mod tool;

pub use chat_model::{ChatDelta, ChatModel, ChatRequest, ChatResponse, TokenUsage, ToolDefinition};
pub use context::Context;
pub use error::{Error, Result};
pub use interrupt::{ActionRequest, Decision, DecisionKind, InterruptData, InterruptSignal, InterruptSignalKind};
pub use message::{DisplayItem, DisplayMessage, Message, ProcessedContent, Role, ToolCall, ToolResult};
pub use state::{merge_deltas, State, StateDelta, Todo, TodoStatus};
pub use status::Status;
pub use tool::Tool;
