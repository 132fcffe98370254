//! Placement: registering and tearing down agent workers against a
//! `Registry`, with bounded retry so a transient clustered-convergence gap
//! doesn't surface as a hard failure to the caller.
//!
//! Same "acquire, retry with backoff, bounded by a deadline" shape as
//! `SessionLockMap` (`crates/gateway/src/runtime/session_lock.rs`),
//! generalized from per-session locks to per-key placement.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sg_domain::{Error, Result};

use crate::key::RegistryKey;
use crate::registry::{Handle, RegisterOutcome, Registry};

const BACKOFF_START: Duration = Duration::from_millis(10);
const BACKOFF_CAP: Duration = Duration::from_millis(100);
const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// Places workers onto a registry, retrying `register` with capped
/// exponential backoff until either it succeeds, an existing owner is
/// found, or `deadline` elapses.
pub struct Placement<R: Registry + ?Sized> {
    registry: Arc<R>,
    deadline: Duration,
}

impl<R: Registry + ?Sized> Placement<R> {
    pub fn new(registry: Arc<R>) -> Self {
        Self {
            registry,
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Start an agent: idempotent with respect to `key`. If another owner
    /// already holds the key, returns its handle instead of erroring —
    /// callers that need "my" worker should `downcast` the returned handle
    /// and compare identity themselves.
    pub async fn start_agent(&self, key: RegistryKey, handle: Handle) -> Result<(RegisterOutcome, Handle)> {
        let started = Instant::now();
        let mut backoff = BACKOFF_START;
        loop {
            match self.registry.register(key.clone(), handle.clone()) {
                Ok((RegisterOutcome::Registered, h)) => return Ok((RegisterOutcome::Registered, h)),
                Ok((RegisterOutcome::AlreadyStarted, h)) => {
                    return Ok((RegisterOutcome::AlreadyStarted, h));
                }
                Err(err) => {
                    if started.elapsed() >= self.deadline {
                        return Err(Error::Timeout(format!(
                            "placement for {key} did not succeed within {:?}: {err}",
                            self.deadline
                        )));
                    }
                    tracing::debug!(key = %key, error = %err, "placement: retrying after transient error");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
            }
        }
    }

    pub fn stop_agent(&self, key: &RegistryKey) {
        self.registry.unregister(key);
    }

    /// The backing registry, for callers (e.g. an agent-management façade)
    /// that need direct `via`/`keys`/`count` access beyond placement itself.
    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::local::LocalRegistry;

    fn handle(node: &str) -> Handle {
        Handle::new(node, Arc::new(7u32))
    }

    #[tokio::test]
    async fn start_agent_registers_new_key() {
        let registry = Arc::new(LocalRegistry::new());
        let placement = Placement::new(registry.clone());
        let key = RegistryKey::AgentWorker("a1".into());

        let (outcome, _) = placement.start_agent(key.clone(), handle("n1")).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Registered);
        assert!(registry.via(&key).is_some());
    }

    #[tokio::test]
    async fn start_agent_is_idempotent_for_existing_owner() {
        let registry = Arc::new(LocalRegistry::new());
        let placement = Placement::new(registry.clone());
        let key = RegistryKey::AgentWorker("a1".into());

        placement.start_agent(key.clone(), handle("n1")).await.unwrap();
        let (outcome, existing) = placement.start_agent(key.clone(), handle("n2")).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::AlreadyStarted);
        assert_eq!(existing.owner_node, "n1");
    }

    #[tokio::test]
    async fn stop_agent_unregisters_key() {
        let registry = Arc::new(LocalRegistry::new());
        let placement = Placement::new(registry.clone());
        let key = RegistryKey::AgentWorker("a1".into());

        placement.start_agent(key.clone(), handle("n1")).await.unwrap();
        placement.stop_agent(&key);
        assert!(registry.via(&key).is_none());
    }
}
