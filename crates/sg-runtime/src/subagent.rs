//! `SubAgent` middleware + `task` tool — recursive delegation.
//!
//! Same sub-delegation shape as `run_agent` (`crates/gateway/src/runtime/
//! agent.rs`), which spawns a nested agent run from a named configuration
//! and folds its result back into the caller. Here the nested run is a
//! full `ExecutionPipeline`, and a pause surfaces to the parent as an
//! `InterruptSignal` carried on a `ToolResult` rather than a return value,
//! so it can lift through the pipeline without exceptions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use sg_domain::{
    Context, Decision, InterruptSignal, InterruptSignalKind, Message, ProcessedContent, State, Tool, ToolDefinition,
    ToolResult,
};

use crate::config::AgentConfig;
use crate::context_scope;
use crate::event_bus::EventBus;
use crate::middleware::Middleware;
use crate::pipeline::{ExecutionPipeline, PipelineChain, RunOutcome};

/// Fork `ctx` for delegation to `config`'s pipeline: each of its middleware
/// may rewrite the forked value map, in list order, before the child
/// context is initialized and any restore closures attached to `ctx` are
/// replayed against it.
fn fork_context_for(config: &AgentConfig, ctx: &Context) -> Context {
    let (map, fns) = ctx.fork_with_middleware(|mut map| {
        for entry in &config.middleware {
            map = entry.middleware.on_fork_context(map);
        }
        map
    });
    Context::init_with_restores(map, fns)
}

/// A named prototype configuration the `task` tool can spawn from, e.g.
/// `"researcher"` or `"coder"`.
pub type SubAgentSpec = Arc<AgentConfig>;

/// One in-flight or paused child, keyed by a generated `sub_agent_id`.
struct PendingChild {
    config: Arc<AgentConfig>,
    chain: PipelineChain,
}

fn never_pause() -> bool {
    false
}

/// Middleware that registers the `task` tool and owns the table of
/// currently-paused children. Construct once per parent `AgentConfig`,
/// wrap in `Arc`, and hand both the middleware entry and a `TaskTool`
/// built from the same `Arc` to the builder — `Middleware::tools()`
/// can't produce `Arc<Self>` from `&self`, so the tool is assembled by
/// the caller instead of returned from this hook.
pub struct SubAgent {
    id: String,
    specs: HashMap<String, SubAgentSpec>,
    event_bus: Arc<EventBus>,
    children: RwLock<HashMap<String, PendingChild>>,
}

impl SubAgent {
    pub fn new(id: impl Into<String>, specs: HashMap<String, SubAgentSpec>, event_bus: Arc<EventBus>) -> Self {
        Self {
            id: id.into(),
            specs,
            event_bus,
            children: RwLock::new(HashMap::new()),
        }
    }

    /// Spawn a fresh child for `agent_type` and run it to completion or its
    /// first interrupt. Returns the `ToolResult` the `task` tool hands back
    /// to the parent pipeline.
    pub async fn run_task(&self, call_id: &str, agent_type: &str, task: &str, ctx: &Context) -> ToolResult {
        let Some(config) = self.specs.get(agent_type).cloned() else {
            return ToolResult::error(call_id, "task", format!("unknown sub-agent type '{agent_type}'"));
        };

        let sub_agent_id = format!("sub-{call_id}");
        let mut state = State::new(&config.agent_id);
        state.messages.push(Message::user(task));
        let chain = PipelineChain::new(state);

        let child_ctx = fork_context_for(&config, ctx);
        let pipeline = ExecutionPipeline::new(config.clone(), self.event_bus.clone());
        let (chain, outcome) = pipeline.run(chain, &child_ctx, &never_pause).await;

        self.fold_outcome(call_id, &sub_agent_id, agent_type, config, chain, outcome)
    }

    /// Re-invoke a paused child with operator `decisions`, resuming the
    /// `task` tool call it was parked under.
    pub async fn resume_task(&self, call_id: &str, sub_agent_id: &str, decisions: Vec<Decision>, ctx: &Context) -> ToolResult {
        let Some(PendingChild { config, chain }) = self.children.write().remove(sub_agent_id) else {
            return ToolResult::error(call_id, "task", format!("no paused sub-agent '{sub_agent_id}'"));
        };

        let child_ctx = fork_context_for(&config, ctx);
        let pipeline = ExecutionPipeline::new(config.clone(), self.event_bus.clone());
        let (chain, outcome) = pipeline.resume(chain, decisions, &child_ctx, &never_pause).await;

        // subagent_type isn't needed again on resume; the parent already
        // recorded it on the first interrupt.
        self.fold_outcome(call_id, sub_agent_id, "", config, chain, outcome)
    }

    fn fold_outcome(
        &self,
        call_id: &str,
        sub_agent_id: &str,
        agent_type: &str,
        config: Arc<AgentConfig>,
        chain: PipelineChain,
        outcome: RunOutcome,
    ) -> ToolResult {
        match outcome {
            RunOutcome::Ok { .. } => {
                let text = chain
                    .state
                    .messages
                    .iter()
                    .rev()
                    .find(|m| matches!(m.role, sg_domain::Role::Assistant))
                    .map(|m| m.text.clone())
                    .unwrap_or_default();
                ToolResult::ok(call_id, "task", text)
            }
            RunOutcome::Interrupt(data) => {
                let signal = InterruptSignal {
                    kind: InterruptSignalKind::SubagentHitl,
                    sub_agent_id: sub_agent_id.to_string(),
                    subagent_type: agent_type.to_string(),
                    interrupt_data: data,
                    tool_call_id: Some(call_id.to_string()),
                };
                self.children.write().insert(sub_agent_id.to_string(), PendingChild { config, chain });
                ToolResult::ok(call_id, "task", "sub-agent paused for approval")
                    .with_processed(ProcessedContent::Interrupt(signal))
            }
            RunOutcome::Pause => ToolResult::error(call_id, "task", "sub-agent paused unexpectedly"),
            RunOutcome::Error(err) => ToolResult::error(call_id, "task", err.to_string()),
        }
    }
}

#[async_trait]
impl Middleware for SubAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// The `task` tool itself: wraps an `Arc<SubAgent>` so the parent pipeline
/// can dispatch to it like any other tool, while `AgentWorker::resume`
/// reaches the same `SubAgent` through the middleware list (via `as_any`)
/// to route a resume into `resume_task` instead of a fresh `run_task`.
pub struct TaskTool(pub Arc<SubAgent>);

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "task".to_string(),
            description: "Delegate a task to a named sub-agent and wait for its result.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "agent_type": {"type": "string"},
                    "task": {"type": "string"},
                },
                "required": ["agent_type", "task"],
            }),
        }
    }

    async fn execute(&self, call_id: &str, arguments: serde_json::Value, _state: &State) -> ToolResult {
        let agent_type = arguments.get("agent_type").and_then(|v| v.as_str()).unwrap_or_default();
        let task = arguments.get("task").and_then(|v| v.as_str()).unwrap_or_default();
        let ctx = context_scope::current(|ctx| ctx.clone());
        self.0.run_task(call_id, agent_type, task, &ctx).await
    }
}

#[cfg(test)]
mod tests {
    use sg_domain::{ChatDelta, ChatModel, ChatRequest, ChatResponse, Result};

    use super::*;
    use crate::hitl::HumanInTheLoop;

    struct PlainModel(&'static str);

    #[async_trait]
    impl ChatModel for PlainModel {
        fn id(&self) -> &str {
            "plain"
        }

        async fn complete(&self, _request: &ChatRequest, _on_delta: &mut (dyn FnMut(ChatDelta) + Send)) -> Result<ChatResponse> {
            Ok(ChatResponse { text: self.0.to_string(), tool_calls: Vec::new(), usage: Default::default() })
        }
    }

    async fn child_config(agent_id: &str, reply: &'static str) -> Arc<AgentConfig> {
        Arc::new(
            AgentConfig::builder(agent_id, Arc::new(PlainModel(reply)))
                .build()
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn run_task_returns_child_final_text_on_completion() {
        let mut specs = HashMap::new();
        specs.insert("researcher".to_string(), child_config("sub-researcher", "done researching").await);
        let subagent = Arc::new(SubAgent::new("subagent", specs, Arc::new(EventBus::new())));

        let result = subagent.run_task("c1", "researcher", "look into X", &Context::new()).await;
        assert!(!result.is_error);
        assert_eq!(result.content, "done researching");
        assert!(result.processed_content.is_none());
    }

    #[tokio::test]
    async fn run_task_unknown_type_is_an_error() {
        let subagent = Arc::new(SubAgent::new("subagent", HashMap::new(), Arc::new(EventBus::new())));
        let result = subagent.run_task("c1", "ghost", "do something", &Context::new()).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn run_task_forks_parent_context_through_middleware_hooks() {
        struct InjectingMiddleware;

        #[async_trait]
        impl Middleware for InjectingMiddleware {
            fn id(&self) -> &str {
                "injecting"
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self
            }

            fn on_fork_context(&self, mut ctx: HashMap<String, serde_json::Value>) -> HashMap<String, serde_json::Value> {
                ctx.insert("injected".to_string(), serde_json::json!(true));
                ctx
            }
        }

        let config = Arc::new(
            AgentConfig::builder("sub-checker", Arc::new(PlainModel("ok")))
                .middleware(vec![crate::middleware::MiddlewareEntry::new(Arc::new(InjectingMiddleware))])
                .build()
                .await
                .unwrap(),
        );

        let child_ctx = fork_context_for(&config, &Context::new());
        assert_eq!(child_ctx.fetch("injected", serde_json::Value::Null), serde_json::json!(true));
    }

    #[tokio::test]
    async fn child_hitl_interrupt_surfaces_as_interrupt_signal_then_resumes() {
        struct ToolCallModel;

        #[async_trait]
        impl ChatModel for ToolCallModel {
            fn id(&self) -> &str {
                "tool_call"
            }

            async fn complete(&self, request: &ChatRequest, _on_delta: &mut (dyn FnMut(ChatDelta) + Send)) -> Result<ChatResponse> {
                let already_ran = request.messages.iter().any(|m| !m.tool_results.is_empty());
                if already_ran {
                    Ok(ChatResponse { text: "wrote it".to_string(), tool_calls: Vec::new(), usage: Default::default() })
                } else {
                    Ok(ChatResponse {
                        text: String::new(),
                        tool_calls: vec![sg_domain::ToolCall {
                            call_id: "inner1".into(),
                            name: "write_file".into(),
                            arguments: serde_json::json!({}),
                            display_text: None,
                        }],
                        usage: Default::default(),
                    })
                }
            }
        }

        struct NoopTool;

        #[async_trait]
        impl Tool for NoopTool {
            fn name(&self) -> &str {
                "write_file"
            }

            fn definition(&self) -> ToolDefinition {
                ToolDefinition { name: "write_file".into(), description: String::new(), parameters: serde_json::json!({}) }
            }

            async fn execute(&self, call_id: &str, _arguments: serde_json::Value, _state: &State) -> ToolResult {
                ToolResult::ok(call_id, "write_file", "wrote")
            }
        }

        let child_config = Arc::new(
            AgentConfig::builder("coder", Arc::new(ToolCallModel))
                .tools(vec![Arc::new(NoopTool)])
                .hitl(Arc::new(HumanInTheLoop::new(["write_file"])))
                .build()
                .await
                .unwrap(),
        );
        let mut specs = HashMap::new();
        specs.insert("coder".to_string(), child_config);
        let subagent = Arc::new(SubAgent::new("subagent", specs, Arc::new(EventBus::new())));

        let result = subagent.run_task("c1", "coder", "write hello.txt", &Context::new()).await;
        assert!(!result.is_error);
        let Some(ProcessedContent::Interrupt(signal)) = result.processed_content else {
            panic!("expected an interrupt signal");
        };
        assert_eq!(signal.sub_agent_id, "sub-c1");
        assert_eq!(signal.interrupt_data.action_requests.len(), 1);

        let resumed = subagent.resume_task("c1", "sub-c1", vec![Decision::Approve], &Context::new()).await;
        assert!(!resumed.is_error);
        assert_eq!(resumed.content, "wrote it");
    }
}
