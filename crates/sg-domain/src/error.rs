//! Shared error type used across all sagents crates.

/// Errors the runtime kernel can surface. Every non-recoverable condition
/// named in the error handling design maps to exactly one variant here.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration: {0}")]
    Config(String),

    #[error("middleware {id} failed to initialize: {reason}")]
    MiddlewareInit { id: String, reason: String },

    #[error("tool {name} failed: {reason}")]
    ToolExecution { name: String, reason: String },

    #[error("llm call failed: {0}")]
    LlmCall(String),

    #[error("exceeded max runs")]
    ExceededMaxRuns,

    #[error("until_tool '{0}' was not called")]
    UntilToolNotCalled(String),

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("not idle")]
    NotIdle,

    #[error("not running")]
    NotRunning,

    #[error("not interrupted")]
    NotInterrupted,

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
