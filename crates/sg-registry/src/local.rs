//! In-process registry backend — O(1) lookup, keyed on equality.
//!
//! Same `RwLock<HashMap<..>>` shape used elsewhere for shared,
//! rarely-contended maps.

use std::collections::HashMap;

use parking_lot::RwLock;
use sg_domain::Result;

use crate::key::RegistryKey;
use crate::registry::{Handle, RegisterOutcome, Registry};

#[derive(Default)]
pub struct LocalRegistry {
    entries: RwLock<HashMap<RegistryKey, Handle>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry for LocalRegistry {
    fn register(&self, key: RegistryKey, handle: Handle) -> Result<(RegisterOutcome, Handle)> {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&key) {
            tracing::debug!(key = %key, "registry: key already live, returning existing owner");
            return Ok((RegisterOutcome::AlreadyStarted, existing.clone()));
        }
        tracing::info!(key = %key, "registry: registered");
        entries.insert(key, handle.clone());
        Ok((RegisterOutcome::Registered, handle))
    }

    fn via(&self, key: &RegistryKey) -> Option<Handle> {
        self.entries.read().get(key).cloned()
    }

    fn lookup(&self, key: &RegistryKey) -> Vec<Handle> {
        self.via(key).into_iter().collect()
    }

    fn unregister(&self, key: &RegistryKey) {
        if self.entries.write().remove(key).is_some() {
            tracing::info!(key = %key, "registry: unregistered");
        }
    }

    fn keys(&self, variant: &str) -> Vec<RegistryKey> {
        self.entries
            .read()
            .keys()
            .filter(|k| k.variant() == variant)
            .cloned()
            .collect()
    }

    fn count(&self) -> usize {
        self.entries.read().len()
    }

    fn select(&self, pattern: &str) -> Vec<RegistryKey> {
        self.entries
            .read()
            .keys()
            .filter(|k| k.identifier().contains(pattern))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn handle(node: &str) -> Handle {
        Handle::new(node, Arc::new(42u32))
    }

    #[test]
    fn register_then_via_resolves() {
        let reg = LocalRegistry::new();
        let key = RegistryKey::AgentWorker("a1".into());
        let (outcome, _) = reg.register(key.clone(), handle("n1")).unwrap();
        assert_eq!(outcome, RegisterOutcome::Registered);
        assert!(reg.via(&key).is_some());
    }

    #[test]
    fn duplicate_register_returns_already_started() {
        let reg = LocalRegistry::new();
        let key = RegistryKey::AgentWorker("a1".into());
        reg.register(key.clone(), handle("n1")).unwrap();
        let (outcome, existing) = reg.register(key.clone(), handle("n2")).unwrap();
        assert_eq!(outcome, RegisterOutcome::AlreadyStarted);
        assert_eq!(existing.owner_node, "n1");
    }

    #[test]
    fn unregister_removes_key() {
        let reg = LocalRegistry::new();
        let key = RegistryKey::AgentWorker("a1".into());
        reg.register(key.clone(), handle("n1")).unwrap();
        reg.unregister(&key);
        assert!(reg.via(&key).is_none());
    }

    #[test]
    fn keys_filters_by_variant() {
        let reg = LocalRegistry::new();
        reg.register(RegistryKey::AgentWorker("a1".into()), handle("n1"))
            .unwrap();
        reg.register(RegistryKey::AgentSupervisor("a1".into()), handle("n1"))
            .unwrap();
        let workers = reg.keys("agent_worker");
        assert_eq!(workers.len(), 1);
    }

    #[test]
    fn select_matches_substring_of_identifier() {
        let reg = LocalRegistry::new();
        reg.register(RegistryKey::AgentWorker("sub-researcher".into()), handle("n1"))
            .unwrap();
        reg.register(RegistryKey::AgentWorker("sub-coder".into()), handle("n1"))
            .unwrap();
        let matches = reg.select("researcher");
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn count_reflects_all_variants() {
        let reg = LocalRegistry::new();
        reg.register(RegistryKey::AgentWorker("a1".into()), handle("n1"))
            .unwrap();
        reg.register(RegistryKey::FilesystemWorker("scope1".into()), handle("n1"))
            .unwrap();
        assert_eq!(reg.count(), 2);
    }
}
