//! Sagents: an orchestration runtime for long-lived LLM agents.
//!
//! This crate is the public façade over the kernel split across
//! `sg-domain` (data model and capability traits), `sg-registry`
//! (placement/registry backends), and `sg-runtime` (the worker, pipeline,
//! middleware, and event bus). Most applications only need `sagents::prelude`.

pub use sg_domain as domain;
pub use sg_registry as registry;
pub use sg_runtime as runtime;

pub mod manager;

/// Everything most embedding applications need: the worker handle, its
/// configuration builder, the data model, and the registry/placement types.
pub mod prelude {
    pub use sg_domain::{
        ActionRequest, ChatDelta, ChatModel, ChatRequest, ChatResponse, Context, Decision, DecisionKind,
        DisplayItem, DisplayMessage, Error, InterruptData, InterruptSignal, InterruptSignalKind, merge_deltas,
        Message, ProcessedContent, Result, Role, State, StateDelta, Status, Todo, TodoStatus, Tool,
        ToolCall, ToolDefinition, ToolResult, TokenUsage,
    };
    pub use sg_registry::{
        ClusteredRegistry, DistributionConfig, Handle, LocalRegistry, Placement, RegisterOutcome, Registry,
        RegistryKey, RuntimeConfig,
    };
    pub use sg_runtime::{
        AfterModelOutcome, AgentConfig, AgentConfigBuilder, AgentPersistence, AgentWorker, DisplayMessagePersistence,
        Envelope, EventBus, ExecutionPipeline, HumanInTheLoop, Middleware, MiddlewareEntry, Payload,
        PersistenceContext, PersistenceHooks, PipelineChain, PipelineMode, RunOutcome, ShutdownReason, SubAgent,
        TaskTool, ToolInfo, ToolLifecycle,
    };
    pub use crate::manager::{AgentInfo, AgentManager, StartOptions, StartOutcome, StopOptions};
}
