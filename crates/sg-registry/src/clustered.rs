//! Clustered registry backend — CRDT-replicated, eventually consistent.
//!
//! Generalizes connected-node bookkeeping (`crates/gateway/src/nodes/registry.rs`)
//! to arbitrary registry keys, plus a last-writer-wins merge so unit tests
//! can exercise convergence without a real gossip transport. Consumers must
//! treat lookups as advisory under partition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use sg_domain::Result;

use crate::key::RegistryKey;
use crate::registry::{Handle, RegisterOutcome, Registry};

#[derive(Clone)]
struct Entry {
    handle: Handle,
    version: u64,
}

/// Notified when `converge()` observes a key's owner node change. Carries
/// `(key, old_owner, new_owner)`; set via `on_transfer`. Kept outside
/// `sg-registry`'s own event types to avoid this crate depending on
/// `sg-runtime`'s `Payload` — the caller (an agent-management façade) adapts
/// this into whatever event shape it publishes.
pub type TransferObserver = Arc<dyn Fn(&RegistryKey, &str, &str) + Send + Sync>;

/// A registry backend that replicates to other `ClusteredRegistry`
/// instances via explicit `converge()` calls. Each entry carries a logical
/// clock; convergence keeps the highest version, tie-broken by
/// lexicographically-smallest owner node for determinism.
pub struct ClusteredRegistry {
    node_id: String,
    entries: RwLock<HashMap<RegistryKey, Entry>>,
    clock: AtomicU64,
    transfer_observer: RwLock<Option<TransferObserver>>,
}

impl ClusteredRegistry {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            entries: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            transfer_observer: RwLock::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Install the callback `converge()` invokes when a key's owning node
    /// actually changes. Replaces any previously-installed observer.
    pub fn on_transfer(&self, observer: TransferObserver) {
        *self.transfer_observer.write() = Some(observer);
    }

    fn next_version(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Pull every peer's view into this one, keeping the highest-version
    /// entry per key (ties broken by owner node name). Call from both
    /// sides to simulate a converged gossip round. Fires `on_transfer` for
    /// every key whose owner actually changes.
    pub fn converge(&self, peer: &ClusteredRegistry) {
        let peer_entries = peer.entries.read().clone();
        let mut mine = self.entries.write();
        for (key, incoming) in peer_entries {
            match mine.get(&key) {
                Some(existing) if !should_replace(existing, &incoming) => continue,
                Some(existing) => {
                    if existing.handle.owner_node != incoming.handle.owner_node {
                        if let Some(observer) = self.transfer_observer.read().as_ref() {
                            observer(&key, &existing.handle.owner_node, &incoming.handle.owner_node);
                        }
                    }
                    mine.insert(key, incoming);
                }
                None => {
                    mine.insert(key, incoming);
                }
            }
        }
    }
}

fn should_replace(existing: &Entry, incoming: &Entry) -> bool {
    match incoming.version.cmp(&existing.version) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => incoming.handle.owner_node < existing.handle.owner_node,
    }
}

impl Registry for ClusteredRegistry {
    fn register(&self, key: RegistryKey, handle: Handle) -> Result<(RegisterOutcome, Handle)> {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&key) {
            tracing::debug!(
                key = %key,
                owner = %existing.handle.owner_node,
                "clustered registry: key already live elsewhere"
            );
            return Ok((RegisterOutcome::AlreadyStarted, existing.handle.clone()));
        }
        let version = self.next_version();
        tracing::info!(key = %key, node = %self.node_id, version, "clustered registry: registered");
        entries.insert(key, Entry { handle: handle.clone(), version });
        Ok((RegisterOutcome::Registered, handle))
    }

    fn via(&self, key: &RegistryKey) -> Option<Handle> {
        self.entries.read().get(key).map(|e| e.handle.clone())
    }

    fn lookup(&self, key: &RegistryKey) -> Vec<Handle> {
        self.via(key).into_iter().collect()
    }

    fn unregister(&self, key: &RegistryKey) {
        self.entries.write().remove(key);
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
        Handle::new(node, Arc::new(1u32))
    }

    #[test]
    fn two_nodes_converge_to_single_owner() {
        let n1 = ClusteredRegistry::new("node1");
        let n2 = ClusteredRegistry::new("node2");
        let key = RegistryKey::AgentWorker("a1".into());

        // node1 wins the race.
        n1.register(key.clone(), handle("node1")).unwrap();

        // node2 hasn't seen it yet, so it also registers locally —
        // a transient duplicate-owner window until convergence.
        let (outcome, _) = n2.register(key.clone(), handle("node2")).unwrap();
        assert_eq!(outcome, RegisterOutcome::Registered);

        // After convergence, exactly one owner remains on both sides.
        n1.converge(&n2);
        n2.converge(&n1);

        let owner1 = n1.via(&key).unwrap().owner_node;
        let owner2 = n2.via(&key).unwrap().owner_node;
        assert_eq!(owner1, owner2);
    }

    #[test]
    fn convergence_is_deterministic_given_equal_versions() {
        let n1 = ClusteredRegistry::new("b-node");
        let n2 = ClusteredRegistry::new("a-node");
        let key = RegistryKey::AgentWorker("a1".into());

        n1.register(key.clone(), handle("b-node")).unwrap();
        n2.register(key.clone(), handle("a-node")).unwrap();

        n1.converge(&n2);
        n2.converge(&n1);

        // Tie-break picks the lexicographically smaller node name.
        assert_eq!(n1.via(&key).unwrap().owner_node, "a-node");
        assert_eq!(n2.via(&key).unwrap().owner_node, "a-node");
    }

    #[test]
    fn later_version_always_wins_regardless_of_node_name() {
        let n1 = ClusteredRegistry::new("z-node");
        let n2 = ClusteredRegistry::new("a-node");
        let key = RegistryKey::AgentWorker("a1".into());

        n1.register(key.clone(), handle("z-node")).unwrap();
        // n2 registers something else first (bumping its own clock) then
        // the same key, giving it a higher version number.
        n2.register(RegistryKey::AgentWorker("other".into()), handle("a-node"))
            .unwrap();
        n2.register(key.clone(), handle("a-node")).unwrap();

        n1.converge(&n2);
        assert_eq!(n1.via(&key).unwrap().owner_node, "a-node");
    }

    #[test]
    fn unregistered_key_resolves_to_none() {
        let n1 = ClusteredRegistry::new("node1");
        let key = RegistryKey::AgentWorker("ghost".into());
        assert!(n1.via(&key).is_none());
    }

    #[test]
    fn on_transfer_fires_when_owner_changes_during_convergence() {
        let n1 = ClusteredRegistry::new("z-node");
        let n2 = ClusteredRegistry::new("a-node");
        let key = RegistryKey::AgentWorker("a1".into());

        n1.register(key.clone(), handle("z-node")).unwrap();
        n2.register(RegistryKey::AgentWorker("other".into()), handle("a-node")).unwrap();
        n2.register(key.clone(), handle("a-node")).unwrap();

        let seen = Arc::new(RwLock::new(None));
        let seen_write = seen.clone();
        n1.on_transfer(Arc::new(move |key, old, new| {
            *seen_write.write() = Some((key.clone(), old.to_string(), new.to_string()));
        }));

        n1.converge(&n2);

        let (transferred_key, old, new) = seen.read().clone().expect("observer should have fired");
        assert_eq!(transferred_key, key);
        assert_eq!(old, "z-node");
        assert_eq!(new, "a-node");
    }
}
