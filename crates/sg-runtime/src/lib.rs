//! Agent worker runtime: context propagation, event bus, middleware
//! pipeline, HITL/sub-agent interrupts, and the `AgentWorker` actor that
//! ties them together.

pub mod config;
pub mod context_scope;
pub mod event_bus;
pub mod hitl;
pub mod middleware;
pub mod persistence;
pub mod pipeline;
pub mod subagent;
pub mod worker;

pub use config::{AgentConfig, AgentConfigBuilder, BeforeFallbackFn, PipelineMode};
pub use event_bus::{DebugEnvelope, Envelope, EventBus, Payload, ShutdownReason, ToolInfo, ToolLifecycle};
pub use hitl::HumanInTheLoop;
pub use middleware::{AfterModelOutcome, Middleware, MiddlewareEntry};
pub use persistence::{AgentPersistence, DisplayMessagePersistence, PersistenceContext, PersistenceHooks};
pub use pipeline::{ExecutionPipeline, PipelineChain, RunOutcome, ShouldPause, StepOutcome};
pub use subagent::{SubAgent, SubAgentSpec, TaskTool};
pub use worker::AgentWorker;
