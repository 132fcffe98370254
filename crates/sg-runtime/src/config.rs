//! `AgentConfig` — immutable, assembled once per worker start.
//!
//! Same shape as `AgentRuntime`/`AgentManager::from_config`
//! (`crates/gateway/src/runtime/agent.rs`), which likewise builds a
//! per-agent immutable bundle once and hands out `Arc` clones of it.

use std::collections::HashSet;
use std::sync::Arc;

use sg_domain::{ChatModel, ChatRequest, Error, Result, Tool};

use crate::hitl::HumanInTheLoop;
use crate::middleware::MiddlewareEntry;

/// Whether the pipeline runs its normal middleware-mediated turn, or a raw
/// provider passthrough. Raw mode is permitted but does not guarantee HITL
/// or state propagation; `AgentConfigBuilder` logs a warning when it's
/// selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineMode {
    #[default]
    Standard,
    Raw,
}

/// Rewrites the outgoing request before a fallback model is tried (e.g.
/// trimming context for a cheaper model).
pub type BeforeFallbackFn = Arc<dyn Fn(&mut ChatRequest) + Send + Sync>;

/// Immutable, constructed once per worker start and never mutated
/// thereafter.
#[derive(Clone)]
pub struct AgentConfig {
    pub agent_id: String,
    pub name: String,
    pub chat_model: Arc<dyn ChatModel>,
    pub fallback_models: Vec<Arc<dyn ChatModel>>,
    pub base_system_prompt: String,
    pub tools: Vec<Arc<dyn Tool>>,
    pub middleware: Vec<MiddlewareEntry>,
    pub assembled_system_prompt: String,
    pub mode: PipelineMode,
    pub until_tool: Option<Vec<String>>,
    pub max_runs: u32,
    pub before_fallback: Option<BeforeFallbackFn>,
    /// The configured `HumanInTheLoop` policy, if any. Held directly
    /// (rather than discovered by downcasting `middleware`) because the
    /// pipeline's `check_pre_tool_hitl` step needs its policy table, not
    /// just its generic hook behavior.
    pub hitl: Option<Arc<HumanInTheLoop>>,
}

impl AgentConfig {
    pub fn builder(agent_id: impl Into<String>, chat_model: Arc<dyn ChatModel>) -> AgentConfigBuilder {
        AgentConfigBuilder::new(agent_id, chat_model)
    }

    /// All tool names in assembly order, used to validate `until_tool`
    /// membership at the top of a pipeline run.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn find_tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }
}

pub struct AgentConfigBuilder {
    agent_id: String,
    name: Option<String>,
    chat_model: Arc<dyn ChatModel>,
    fallback_models: Vec<Arc<dyn ChatModel>>,
    base_system_prompt: String,
    tools: Vec<Arc<dyn Tool>>,
    middleware: Vec<MiddlewareEntry>,
    mode: PipelineMode,
    until_tool: Option<Vec<String>>,
    max_runs: u32,
    before_fallback: Option<BeforeFallbackFn>,
    hitl: Option<Arc<HumanInTheLoop>>,
}

const DEFAULT_MAX_RUNS: u32 = 50;

impl AgentConfigBuilder {
    pub fn new(agent_id: impl Into<String>, chat_model: Arc<dyn ChatModel>) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: None,
            chat_model,
            fallback_models: Vec::new(),
            base_system_prompt: String::new(),
            tools: Vec::new(),
            middleware: Vec::new(),
            mode: PipelineMode::Standard,
            until_tool: None,
            max_runs: DEFAULT_MAX_RUNS,
            before_fallback: None,
            hitl: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn fallback_models(mut self, models: Vec<Arc<dyn ChatModel>>) -> Self {
        self.fallback_models = models;
        self
    }

    pub fn base_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.base_system_prompt = prompt.into();
        self
    }

    pub fn tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn middleware(mut self, middleware: Vec<MiddlewareEntry>) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn mode(mut self, mode: PipelineMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn until_tool(mut self, names: Vec<String>) -> Self {
        self.until_tool = Some(names);
        self
    }

    pub fn max_runs(mut self, max_runs: u32) -> Self {
        self.max_runs = max_runs;
        self
    }

    pub fn before_fallback(mut self, hook: BeforeFallbackFn) -> Self {
        self.before_fallback = Some(hook);
        self
    }

    pub fn hitl(mut self, hitl: Arc<HumanInTheLoop>) -> Self {
        self.hitl = Some(hitl);
        self
    }

    /// Assemble the final config: run each middleware's one-time `init()`,
    /// concatenate middleware tools after user-supplied tools (rejecting
    /// duplicate names), and compute `assembled_system_prompt` once.
    pub async fn build(self) -> Result<AgentConfig> {
        if self.mode == PipelineMode::Raw {
            tracing::warn!(
                agent_id = %self.agent_id,
                "agent configured in raw pipeline mode: HITL and state propagation are not guaranteed"
            );
        }

        for entry in &self.middleware {
            entry.middleware.init().await.map_err(|err| Error::MiddlewareInit {
                id: entry.id.clone(),
                reason: err.to_string(),
            })?;
        }

        let mut tools = self.tools;
        for entry in &self.middleware {
            tools.extend(entry.middleware.tools());
        }

        let mut seen = HashSet::new();
        for tool in &tools {
            if !seen.insert(tool.name().to_string()) {
                return Err(Error::Config(format!("duplicate tool name: {}", tool.name())));
            }
        }

        let mw_prompts: Vec<String> = self
            .middleware
            .iter()
            .flat_map(|entry| entry.middleware.system_prompt())
            .collect();

        let assembled_system_prompt = if mw_prompts.is_empty() {
            self.base_system_prompt.clone()
        } else {
            format!("{}\n\n{}", self.base_system_prompt, mw_prompts.join("\n\n"))
        };

        Ok(AgentConfig {
            agent_id: self.agent_id.clone(),
            name: self.name.unwrap_or(self.agent_id),
            chat_model: self.chat_model,
            fallback_models: self.fallback_models,
            base_system_prompt: self.base_system_prompt,
            tools,
            middleware: self.middleware,
            assembled_system_prompt,
            mode: self.mode,
            until_tool: self.until_tool,
            max_runs: self.max_runs,
            before_fallback: self.before_fallback,
            hitl: self.hitl,
        })
    }
}
