//! `ExecutionPipeline` — drives one or more LLM turns until a terminal
//! condition.
//!
//! Same `run_turn`/`TurnEvent`/`TurnInput` phase-driven loop shape
//! (`crates/gateway/src/runtime/mod.rs`), generalized from one concrete
//! turn function into a composable step sequence: `call_llm →
//! check_max_runs → check_pause → check_pre_tool_hitl → execute_tools →
//! propagate_state → check_post_tool_interrupt → maybe_check_until_tool →
//! continue_or_done_safe`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::FutureExt;

use sg_domain::{
    merge_deltas, ChatDelta, ChatRequest, Context, Decision, Error, InterruptData, Message, ProcessedContent, Result,
    State, StateDelta, Status, ToolResult,
};

use crate::config::AgentConfig;
use crate::context_scope;
use crate::event_bus::{EventBus, Payload, ToolInfo, ToolLifecycle};
use crate::middleware::{run_after_model, run_before_model, AfterModelOutcome};

/// Short-circuiting outcome of the two pipeline steps that can branch into
/// more than one non-error shape — a tagged union, never an exception.
/// Steps that can only ever continue-or-error use a plain `Result` instead;
/// this enum exists only for the steps that genuinely branch three ways.
pub enum StepOutcome {
    Continue,
    Interrupt(InterruptData),
    Ok(Option<ToolResult>),
}

/// Per-run working data threaded through the step sequence.
#[derive(Clone)]
pub struct PipelineChain {
    pub state: State,
    pub run_count: u32,
    pub last_assistant_had_tool_calls: bool,
}

impl PipelineChain {
    pub fn new(state: State) -> Self {
        Self {
            state,
            run_count: 0,
            last_assistant_had_tool_calls: false,
        }
    }
}

/// Terminal result of a `run`/`resume` call.
pub enum RunOutcome {
    /// The run finished; `extra` is the matching `until_tool` result, if
    /// `until_tool` was configured and it fired.
    Ok { extra: Option<ToolResult> },
    Interrupt(InterruptData),
    Pause,
    Error(Error),
}

pub type ShouldPause = dyn Fn() -> bool + Send + Sync;

pub struct ExecutionPipeline {
    config: Arc<AgentConfig>,
    event_bus: Arc<EventBus>,
}

impl ExecutionPipeline {
    pub fn new(config: Arc<AgentConfig>, event_bus: Arc<EventBus>) -> Self {
        Self { config, event_bus }
    }

    /// Publish on the main topic and notify every middleware's
    /// observability hook.
    fn emit(&self, payload: Payload) {
        for entry in &self.config.middleware {
            entry.middleware.on_event(&self.config.agent_id, &payload);
        }
        self.event_bus.publish(&self.config.agent_id, payload);
    }

    /// Validate `until_tool` membership before any LLM call; returns an
    /// error before any LLM call rather than failing mid-turn.
    fn validate_until_tool(&self) -> Result<()> {
        if let Some(names) = &self.config.until_tool {
            let known = self.config.tool_names();
            for name in names {
                if !known.contains(name) {
                    return Err(Error::Config(format!(
                        "until_tool references unknown tool '{name}'"
                    )));
                }
            }
        }
        Ok(())
    }

    pub async fn run(&self, chain: PipelineChain, ctx: &Context, should_pause: &ShouldPause) -> (PipelineChain, RunOutcome) {
        if let Err(err) = self.validate_until_tool() {
            return (chain, RunOutcome::Error(err));
        }
        self.turn_loop(chain, ctx, should_pause, false).await
    }

    /// Apply `decisions` to the current interrupt's `action_requests`,
    /// then re-enter the pipeline at `propagate_state` (not `call_llm`).
    pub async fn resume(
        &self,
        mut chain: PipelineChain,
        decisions: Vec<Decision>,
        ctx: &Context,
        should_pause: &ShouldPause,
    ) -> (PipelineChain, RunOutcome) {
        let data = match chain.state.interrupt_data.take() {
            Some(d) => d,
            None => return (chain, RunOutcome::Error(Error::NotInterrupted)),
        };

        let results = self.apply_decisions(&data, decisions).await;
        self.resume_with_tool_results(chain, data, results, ctx, should_pause).await
    }

    /// Shared tail of `resume`: insert the tool-role message carrying
    /// `results`, advance to the next sibling interrupt if one is queued,
    /// otherwise re-enter the loop at `propagate_state`. Used both by the
    /// direct (`apply_decisions`) path and by sub-agent resume, where the
    /// "tool result" is the `task` tool's own re-invocation outcome rather
    /// than a freshly executed parent tool.
    pub async fn resume_with_tool_results(
        &self,
        mut chain: PipelineChain,
        mut data: InterruptData,
        results: Vec<ToolResult>,
        ctx: &Context,
        should_pause: &ShouldPause,
    ) -> (PipelineChain, RunOutcome) {
        chain.state.messages.push(Message::tool_results(results));

        if data.advance() {
            chain.state.interrupt_data = Some(data.clone());
            return (chain, RunOutcome::Interrupt(data));
        }

        self.turn_loop(chain, ctx, should_pause, true).await
    }

    async fn apply_decisions(&self, data: &InterruptData, decisions: Vec<Decision>) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(data.action_requests.len());
        for (request, decision) in data.action_requests.iter().zip(decisions) {
            let result = match decision {
                Decision::Approve => self.execute_named_tool(&request.tool_call_id, &request.tool_name, request.arguments.clone()).await,
                Decision::Edit { arguments, tool_name } => {
                    let name = tool_name.as_deref().unwrap_or(&request.tool_name);
                    self.execute_named_tool(&request.tool_call_id, name, arguments).await
                }
                Decision::Reject { reason } => {
                    let message = match reason {
                        Some(r) => format!("call rejected by operator: {r}"),
                        None => "call rejected by operator".to_string(),
                    };
                    ToolResult::error(&request.tool_call_id, &request.tool_name, message)
                }
            };
            results.push(result);
        }
        results
    }

    async fn execute_named_tool(&self, call_id: &str, name: &str, arguments: serde_json::Value) -> ToolResult {
        match self.config.find_tool(name) {
            Some(tool) => tool.execute(call_id, arguments, &State::new(&self.config.agent_id)).await,
            None => ToolResult::error(call_id, name, format!("unknown tool '{name}'")),
        }
    }

    /// The shared tail of `run`/`resume`: propagate state, check for a
    /// sub-agent interrupt, check `until_tool`, then either loop back to
    /// `call_llm` or finish. `skip_initial_llm_call` is `true` only on the
    /// first iteration when entering from `resume`.
    async fn turn_loop(
        &self,
        mut chain: PipelineChain,
        ctx: &Context,
        should_pause: &ShouldPause,
        mut skip_initial_llm_call: bool,
    ) -> (PipelineChain, RunOutcome) {
        loop {
            if !skip_initial_llm_call {
                match self.call_llm(&mut chain).await {
                    Err(err) => return (chain, RunOutcome::Error(err)),
                    Ok(Some(data)) => return (chain, RunOutcome::Interrupt(data)),
                    Ok(None) => {}
                }

                if let Err(err) = self.check_max_runs(&chain) {
                    return (chain, RunOutcome::Error(err));
                }

                if should_pause() {
                    return (chain, RunOutcome::Pause);
                }

                if let StepOutcome::Interrupt(data) = self.check_pre_tool_hitl(&chain) {
                    chain.state.interrupt_data = Some(data.clone());
                    return (chain, RunOutcome::Interrupt(data));
                }

                if !chain.last_assistant_had_tool_calls {
                    return self.finish_without_tools(chain);
                }

                self.execute_tools(&mut chain, ctx).await;
            }
            skip_initial_llm_call = false;

            self.propagate_state(&mut chain);

            if let StepOutcome::Interrupt(data) = self.check_post_tool_interrupt(&chain) {
                chain.state.interrupt_data = Some(data.clone());
                return (chain, RunOutcome::Interrupt(data));
            }

            if let StepOutcome::Ok(extra) = self.maybe_check_until_tool(&chain) {
                return (chain, RunOutcome::Ok { extra });
            }

            // continue_or_done_safe: tool results are new input the model
            // hasn't seen yet, so the chain always "needs more" here.
        }
    }

    fn finish_without_tools(&self, chain: PipelineChain) -> (PipelineChain, RunOutcome) {
        if let Some(names) = &self.config.until_tool {
            let err = Error::UntilToolNotCalled(names.join(", "));
            return (chain, RunOutcome::Error(err));
        }
        (chain, RunOutcome::Ok { extra: None })
    }

    /// Dispatch the next LLM request, applying `fallback_models` in order
    /// after an error. Returns `Ok(Some(data))` when `after_model`
    /// middleware requests an interrupt.
    async fn call_llm(&self, chain: &mut PipelineChain) -> Result<Option<InterruptData>> {
        chain.state = run_before_model(&self.config.middleware, chain.state.clone()).await?;

        let request = ChatRequest {
            system_prompt: self.config.assembled_system_prompt.clone(),
            messages: chain.state.messages.clone(),
            tools: self.config.tools.iter().map(|t| t.definition()).collect(),
        };

        let agent_id = self.config.agent_id.clone();
        let event_bus = self.event_bus.clone();
        let mut on_delta = |delta: ChatDelta| {
            event_bus.publish(&agent_id, Payload::LlmDeltas { deltas: vec![delta] });
        };

        let response = match self.config.chat_model.complete(&request, &mut on_delta).await {
            Ok(response) => response,
            Err(primary_err) => {
                let mut last_err = primary_err;
                let mut resolved = None;
                for fallback in &self.config.fallback_models {
                    let mut fallback_request = request.clone();
                    if let Some(hook) = &self.config.before_fallback {
                        hook(&mut fallback_request);
                    }
                    match fallback.complete(&fallback_request, &mut on_delta).await {
                        Ok(response) => {
                            resolved = Some(response);
                            break;
                        }
                        Err(err) => last_err = err,
                    }
                }
                match resolved {
                    Some(response) => response,
                    None => return Err(Error::LlmCall(last_err.to_string())),
                }
            }
        };

        chain.run_count += 1;

        let assistant_message = if response.tool_calls.is_empty() {
            Message::assistant(response.text.clone())
        } else {
            Message::assistant_with_tool_calls(response.text.clone(), response.tool_calls.clone())
        };
        chain.last_assistant_had_tool_calls = assistant_message.has_tool_calls();
        chain.state.messages.push(assistant_message.clone());

        self.emit(Payload::LlmMessage { message: assistant_message });
        self.emit(Payload::LlmTokenUsage { usage: response.usage });

        match run_after_model(&self.config.middleware, chain.state.clone()).await? {
            AfterModelOutcome::Ok(state) => {
                chain.state = state;
                Ok(None)
            }
            AfterModelOutcome::Interrupt(mut state, data) => {
                state.interrupt_data = Some(data.clone());
                chain.state = state;
                Ok(Some(data))
            }
        }
    }

    fn check_max_runs(&self, chain: &PipelineChain) -> Result<()> {
        if chain.run_count > self.config.max_runs {
            Err(Error::ExceededMaxRuns)
        } else {
            Ok(())
        }
    }

    fn check_pre_tool_hitl(&self, chain: &PipelineChain) -> StepOutcome {
        if !chain.last_assistant_had_tool_calls {
            return StepOutcome::Continue;
        }
        let Some(hitl) = &self.config.hitl else {
            return StepOutcome::Continue;
        };
        let Some(last) = chain.state.messages.last() else {
            return StepOutcome::Continue;
        };

        let mut action_requests = Vec::new();
        for call in &last.tool_calls {
            if let Some(allowed) = hitl.allowed_decisions_for(&call.name) {
                action_requests.push(sg_domain::ActionRequest {
                    tool_call_id: call.call_id.clone(),
                    tool_name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    allowed_decisions: allowed,
                });
            }
        }

        if action_requests.is_empty() {
            StepOutcome::Continue
        } else {
            StepOutcome::Interrupt(InterruptData::hitl(action_requests))
        }
    }

    async fn execute_tools(&self, chain: &mut PipelineChain, ctx: &Context) {
        let Some(last) = chain.state.messages.last().cloned() else {
            return;
        };

        let futures = last.tool_calls.iter().map(|call| {
            let tool = self.config.find_tool(&call.name).cloned();
            let call = call.clone();
            let state_snapshot = chain.state.clone();
            let event_bus = self.event_bus.clone();
            let agent_id = self.config.agent_id.clone();
            let task_ctx = ctx.fork();

            async move {
                event_bus.publish(
                    &agent_id,
                    Payload::ToolCallIdentified {
                        tool_info: ToolInfo { call_id: call.call_id.clone(), name: call.name.clone() },
                    },
                );
                event_bus.publish(
                    &agent_id,
                    Payload::ToolExecutionUpdate {
                        stage: ToolLifecycle::Executing,
                        tool_info: ToolInfo { call_id: call.call_id.clone(), name: call.name.clone() },
                    },
                );

                let result = match tool {
                    Some(tool) => {
                        let fut = context_scope::scope(
                            Context::init(task_ctx),
                            tool.execute(&call.call_id, call.arguments.clone(), &state_snapshot),
                        );
                        // A panicking tool is caught and logged, never
                        // allowed to bring down the worker.
                        match AssertUnwindSafe(fut).catch_unwind().await {
                            Ok(result) => result,
                            Err(_) => {
                                tracing::warn!(tool = %call.name, call_id = %call.call_id, "tool execution panicked");
                                ToolResult::error(&call.call_id, &call.name, format!("tool '{}' panicked", call.name))
                            }
                        }
                    }
                    None => ToolResult::error(&call.call_id, &call.name, format!("unknown tool '{}'", call.name)),
                };

                let stage = if result.is_error { ToolLifecycle::Failed } else { ToolLifecycle::Completed };
                event_bus.publish(
                    &agent_id,
                    Payload::ToolExecutionUpdate {
                        stage,
                        tool_info: ToolInfo { call_id: call.call_id.clone(), name: call.name.clone() },
                    },
                );

                result
            }
        });

        let results = join_all(futures).await;
        chain.state.messages.push(Message::tool_results(results));
    }

    /// Merge `State` deltas carried by the newest run of tool-role
    /// messages (the suffix since the last assistant-with-tool-calls
    /// message), in chronological order, right-wins.
    fn propagate_state(&self, chain: &mut PipelineChain) {
        let last_assistant_idx = chain
            .state
            .messages
            .iter()
            .rposition(|m| m.has_tool_calls());
        let Some(start) = last_assistant_idx else {
            return;
        };

        let deltas: Vec<StateDelta> = chain.state.messages[start..]
            .iter()
            .flat_map(|m| m.tool_results.iter())
            .filter_map(|r| match &r.processed_content {
                Some(ProcessedContent::StateDelta(delta)) => Some(delta.clone()),
                _ => None,
            })
            .collect();

        merge_deltas(&mut chain.state, deltas);
    }

    fn check_post_tool_interrupt(&self, chain: &PipelineChain) -> StepOutcome {
        let Some(last_tool_message) = chain.state.messages.iter().rev().find(|m| !m.tool_results.is_empty()) else {
            return StepOutcome::Continue;
        };

        let mut signals = Vec::new();
        for result in &last_tool_message.tool_results {
            if let Some(ProcessedContent::Interrupt(signal)) = &result.processed_content {
                let mut data = signal.interrupt_data.clone();
                data.sub_agent_id = Some(signal.sub_agent_id.clone());
                data.subagent_type = Some(signal.subagent_type.clone());
                data.tool_call_id = signal.tool_call_id.clone();
                signals.push(data);
            }
        }

        match signals.len() {
            0 => StepOutcome::Continue,
            1 => StepOutcome::Interrupt(signals.into_iter().next().unwrap()),
            _ => {
                let mut iter = signals.into_iter();
                let mut current = iter.next().unwrap();
                current.pending_interrupts = iter.collect();
                StepOutcome::Interrupt(current)
            }
        }
    }

    fn maybe_check_until_tool(&self, chain: &PipelineChain) -> StepOutcome {
        let Some(names) = &self.config.until_tool else {
            return StepOutcome::Continue;
        };
        let Some(last_assistant) = chain.state.messages.iter().rev().find(|m| m.has_tool_calls()) else {
            return StepOutcome::Continue;
        };
        let matched_call = last_assistant.tool_calls.iter().find(|c| names.contains(&c.name));
        let Some(matched_call) = matched_call else {
            return StepOutcome::Continue;
        };

        let result = chain
            .state
            .messages
            .iter()
            .rev()
            .flat_map(|m| m.tool_results.iter())
            .find(|r| r.call_id == matched_call.call_id)
            .cloned();

        StepOutcome::Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use sg_domain::{ChatModel, ChatResponse, Error as DomainError, Tool, ToolCall, ToolDefinition};

    use super::*;
    use crate::config::AgentConfig;
    use crate::hitl::HumanInTheLoop;

    struct ScriptedModel {
        replies: parking_lot::Mutex<Vec<ChatResponse>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<ChatResponse>) -> Self {
            Self { replies: parking_lot::Mutex::new(replies) }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: &ChatRequest, _on_delta: &mut (dyn FnMut(ChatDelta) + Send)) -> Result<ChatResponse> {
            let mut replies = self.replies.lock();
            if replies.is_empty() {
                return Err(DomainError::LlmCall("scripted model exhausted".into()));
            }
            Ok(replies.remove(0))
        }
    }

    fn plain_reply(text: &str) -> ChatResponse {
        ChatResponse { text: text.to_string(), tool_calls: Vec::new(), usage: Default::default() }
    }

    fn tool_call_reply(name: &str, call_id: &str) -> ChatResponse {
        ChatResponse {
            text: String::new(),
            tool_calls: vec![ToolCall { call_id: call_id.into(), name: name.into(), arguments: serde_json::json!({}), display_text: None }],
            usage: Default::default(),
        }
    }

    struct EchoTool(&'static str);

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.0
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition { name: self.0.to_string(), description: String::new(), parameters: serde_json::json!({}) }
        }

        async fn execute(&self, call_id: &str, _arguments: serde_json::Value, _state: &State) -> ToolResult {
            ToolResult::ok(call_id, self.0, format!("{} ran", self.0))
        }
    }

    fn never_pause() -> bool {
        false
    }

    #[tokio::test]
    async fn two_turn_chat_reaches_idle_with_plain_reply() {
        let model = Arc::new(ScriptedModel::new(vec![plain_reply("hello")]));
        let config = Arc::new(
            AgentConfig::builder("a1", model)
                .build()
                .await
                .unwrap(),
        );
        let pipeline = ExecutionPipeline::new(config, Arc::new(EventBus::new()));

        let mut state = State::new("a1");
        state.messages.push(Message::user("hi"));
        let chain = PipelineChain::new(state);

        let (chain, outcome) = pipeline.run(chain, &Context::new(), &never_pause).await;
        assert!(matches!(outcome, RunOutcome::Ok { extra: None }));
        assert_eq!(chain.state.messages.len(), 2);
    }

    #[tokio::test]
    async fn hitl_interrupts_before_tool_executes() {
        let model = Arc::new(ScriptedModel::new(vec![tool_call_reply("write_file", "c1")]));
        let hitl = Arc::new(HumanInTheLoop::new(["write_file"]));
        let config = Arc::new(
            AgentConfig::builder("a1", model)
                .tools(vec![Arc::new(EchoTool("write_file"))])
                .hitl(hitl)
                .build()
                .await
                .unwrap(),
        );
        let pipeline = ExecutionPipeline::new(config, Arc::new(EventBus::new()));

        let mut state = State::new("a1");
        state.messages.push(Message::user("write hello.txt"));
        let chain = PipelineChain::new(state);

        let (_chain, outcome) = pipeline.run(chain, &Context::new(), &never_pause).await;
        match outcome {
            RunOutcome::Interrupt(data) => {
                assert_eq!(data.action_requests.len(), 1);
                assert_eq!(data.action_requests[0].tool_name, "write_file");
            }
            _ => panic!("expected an interrupt"),
        }
    }

    #[tokio::test]
    async fn until_tool_success_after_one_detour() {
        let model = Arc::new(ScriptedModel::new(vec![
            tool_call_reply("search", "c1"),
            tool_call_reply("submit_report", "c2"),
        ]));
        let config = Arc::new(
            AgentConfig::builder("a1", model)
                .tools(vec![Arc::new(EchoTool("search")), Arc::new(EchoTool("submit_report"))])
                .until_tool(vec!["submit_report".to_string()])
                .build()
                .await
                .unwrap(),
        );
        let pipeline = ExecutionPipeline::new(config, Arc::new(EventBus::new()));

        let mut state = State::new("a1");
        state.messages.push(Message::user("find and submit"));
        let chain = PipelineChain::new(state);

        let (_chain, outcome) = pipeline.run(chain, &Context::new(), &never_pause).await;
        match outcome {
            RunOutcome::Ok { extra: Some(result) } => assert_eq!(result.name, "submit_report"),
            _ => panic!("expected until_tool match"),
        }
    }

    #[tokio::test]
    async fn until_tool_failure_when_never_called() {
        let model = Arc::new(ScriptedModel::new(vec![plain_reply("I give up")]));
        let config = Arc::new(
            AgentConfig::builder("a1", model)
                .tools(vec![Arc::new(EchoTool("search")), Arc::new(EchoTool("submit_report"))])
                .until_tool(vec!["submit_report".to_string()])
                .build()
                .await
                .unwrap(),
        );
        let pipeline = ExecutionPipeline::new(config, Arc::new(EventBus::new()));

        let mut state = State::new("a1");
        state.messages.push(Message::user("find and submit"));
        let chain = PipelineChain::new(state);

        let (_chain, outcome) = pipeline.run(chain, &Context::new(), &never_pause).await;
        match outcome {
            RunOutcome::Error(Error::UntilToolNotCalled(names)) => assert!(names.contains("submit_report")),
            _ => panic!("expected until_tool_not_called error"),
        }
    }

    #[tokio::test]
    async fn resume_approve_re_executes_tool_and_continues() {
        let model = Arc::new(ScriptedModel::new(vec![tool_call_reply("write_file", "c1"), plain_reply("done")]));
        let hitl = Arc::new(HumanInTheLoop::new(["write_file"]));
        let config = Arc::new(
            AgentConfig::builder("a1", model)
                .tools(vec![Arc::new(EchoTool("write_file"))])
                .hitl(hitl)
                .build()
                .await
                .unwrap(),
        );
        let pipeline = ExecutionPipeline::new(config, Arc::new(EventBus::new()));

        let mut state = State::new("a1");
        state.messages.push(Message::user("write hello.txt"));
        let chain = PipelineChain::new(state);
        let (chain, outcome) = pipeline.run(chain, &Context::new(), &never_pause).await;
        assert!(matches!(outcome, RunOutcome::Interrupt(_)));

        let (chain, outcome) = pipeline
            .resume(chain, vec![Decision::Approve], &Context::new(), &never_pause)
            .await;
        assert!(matches!(outcome, RunOutcome::Ok { .. }));
        // user, assistant(tool_call), tool_results, assistant(final)
        assert_eq!(chain.state.messages.len(), 4);
    }
}
