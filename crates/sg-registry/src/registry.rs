//! The `Registry` abstraction — local and clustered backends are
//! interchangeable behind this trait.

use std::any::Any;
use std::sync::Arc;

use sg_domain::Result;

use crate::key::RegistryKey;

/// An opaque reference to a registered worker. The registry crate does not
/// know about `AgentWorker`/`SubAgentWorker` concretely (that would be a
/// circular dependency on `sg-runtime`); callers `downcast` the inner value
/// to their own handle type.
#[derive(Clone)]
pub struct Handle {
    pub owner_node: String,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Handle {
    pub fn new(owner_node: impl Into<String>, inner: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            owner_node: owner_node.into(),
            inner,
        }
    }

    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.inner.clone().downcast::<T>().ok()
    }
}

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    /// Another owner already holds this key; the caller gets a handle to
    /// the existing owner instead (unique-key semantics).
    AlreadyStarted,
}

pub trait Registry: Send + Sync {
    /// Register `handle` under `key`. Unique-key semantics: if the key is
    /// already live, the existing handle is kept and `AlreadyStarted` is
    /// returned.
    fn register(&self, key: RegistryKey, handle: Handle) -> Result<(RegisterOutcome, Handle)>;

    /// Resolve a single key to its live handle, if any.
    fn via(&self, key: &RegistryKey) -> Option<Handle>;

    /// All handles matching a key (in practice 0 or 1 given unique-key
    /// semantics, but kept as a list per the external interface shape).
    fn lookup(&self, key: &RegistryKey) -> Vec<Handle>;

    /// Remove a key (worker shutdown).
    fn unregister(&self, key: &RegistryKey);

    /// All keys belonging to a given worker variant (e.g. all
    /// `AgentWorker(_)` keys).
    fn keys(&self, variant: &str) -> Vec<RegistryKey>;

    fn count(&self) -> usize;

    /// Keys whose identifier contains `pattern` as a substring.
    fn select(&self, pattern: &str) -> Vec<RegistryKey>;
}
