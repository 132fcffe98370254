//! Registry keys — tagged tuples (variant + identifier).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistryKey {
    AgentWorker(String),
    AgentSupervisor(String),
    SubAgentSupervisor(String),
    FilesystemWorker(String),
}

impl RegistryKey {
    /// The variant tag, used by `select` pattern matching and logging.
    pub fn variant(&self) -> &'static str {
        match self {
            RegistryKey::AgentWorker(_) => "agent_worker",
            RegistryKey::AgentSupervisor(_) => "agent_supervisor",
            RegistryKey::SubAgentSupervisor(_) => "sub_agent_supervisor",
            RegistryKey::FilesystemWorker(_) => "filesystem_worker",
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            RegistryKey::AgentWorker(id)
            | RegistryKey::AgentSupervisor(id)
            | RegistryKey::SubAgentSupervisor(id)
            | RegistryKey::FilesystemWorker(id) => id,
        }
    }
}

impl std::fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.variant(), self.identifier())
    }
}
