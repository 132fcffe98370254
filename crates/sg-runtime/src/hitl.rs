//! Built-in `HumanInTheLoop` middleware — pauses the pipeline before a
//! policy-matched tool call executes.
//!
//! Same shape as `ApprovalStore` (`crates/gateway/src/runtime/approval.rs`):
//! a name-keyed policy table consulted before a side-effecting action runs,
//! with the decision itself supplied later out-of-band.

use std::collections::HashMap;

use async_trait::async_trait;

use sg_domain::DecisionKind;

use crate::middleware::Middleware;

/// Per-tool-name approval policy: which tool names require interruption
/// and which decisions an operator may apply to them.
pub struct HumanInTheLoop {
    policy: HashMap<String, Vec<DecisionKind>>,
}

impl HumanInTheLoop {
    /// Require approval for `tool_names`, each allowing the full
    /// `{approve, edit, reject}` decision set.
    pub fn new<I, S>(tool_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let policy = tool_names
            .into_iter()
            .map(|name| (name.into(), vec![DecisionKind::Approve, DecisionKind::Edit, DecisionKind::Reject]))
            .collect();
        Self { policy }
    }

    /// Require approval for specific `(tool_name, allowed_decisions)` pairs.
    pub fn with_policy(policy: HashMap<String, Vec<DecisionKind>>) -> Self {
        Self { policy }
    }

    pub fn allowed_decisions_for(&self, tool_name: &str) -> Option<Vec<DecisionKind>> {
        self.policy.get(tool_name).cloned()
    }
}

#[async_trait]
impl Middleware for HumanInTheLoop {
    fn id(&self) -> &str {
        "human_in_the_loop"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
