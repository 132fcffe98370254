//! Worker-local ambient key/value map.
//!
//! `Context` never crosses a worker boundary implicitly — a task the worker
//! spawns must have it explicitly captured (`fork`) and re-initialized
//! (`init`) inside the task, because a cooperatively-scheduled task may not
//! inherit thread-local or fiber-local storage.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// A closure a middleware attaches via `add_restore_fn` to rebuild
/// process-local state (e.g. reattaching a trace span) that cannot be
/// serialized across a fork boundary. Carried alongside the plain value map
/// by `fork_with_middleware` and replayed once by `init_with_restores`.
pub type RestoreFn = Arc<dyn Fn(&Context) + Send + Sync>;

/// Worker-local ambient map. Reads/writes touch only the current snapshot;
/// a forked child receives an explicit, independent copy via `fork`.
#[derive(Clone, Default)]
pub struct Context {
    values: HashMap<String, Value>,
    restore_fns: Vec<RestoreFn>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the worker-local map wholesale. The new context starts with
    /// no restore functions attached; use `init_with_restores` when crossing
    /// a fork boundary that carried some.
    pub fn init(map: HashMap<String, Value>) -> Self {
        Self {
            values: map,
            restore_fns: Vec::new(),
        }
    }

    /// `init`, then immediately replay `fns` against the clean context.
    /// This is the counterpart to `fork_with_middleware` on the parent side.
    pub fn init_with_restores(map: HashMap<String, Value>, fns: Vec<RestoreFn>) -> Self {
        let ctx = Self::init(map);
        ctx.run_restores(&fns);
        ctx
    }

    pub fn get(&self) -> &HashMap<String, Value> {
        &self.values
    }

    pub fn fetch(&self, key: &str, default: Value) -> Value {
        self.values.get(key).cloned().unwrap_or(default)
    }

    pub fn put(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn merge(&mut self, other: HashMap<String, Value>) {
        for (k, v) in other {
            self.values.insert(k, v);
        }
    }

    /// A plain, transform-free fork: an independent copy of the current
    /// values, with no restore functions carried over. Suitable for a
    /// worker resuming its own context across a spawned task boundary.
    pub fn fork(&self) -> HashMap<String, Value> {
        self.values.clone()
    }

    /// Fork for a sub-agent delegation: `apply_hooks` is the caller's
    /// composed `on_fork_context` chain across configured middleware,
    /// applied to the plain value map, alongside this context's attached
    /// restore closures. The caller passes both to `init_with_restores` on
    /// the child side.
    pub fn fork_with_middleware(
        &self,
        apply_hooks: impl FnOnce(HashMap<String, Value>) -> HashMap<String, Value>,
    ) -> (HashMap<String, Value>, Vec<RestoreFn>) {
        (apply_hooks(self.values.clone()), self.restore_fns.clone())
    }

    /// Attach a restore closure this context (or a fork of it, via
    /// `fork_with_middleware`) will replay once a child context is
    /// initialized with it.
    pub fn add_restore_fn(&mut self, f: RestoreFn) {
        self.restore_fns.push(f);
    }

    /// Run the attached restore closures against this (already-clean)
    /// context. Panics inside a restore fn are caught and swallowed.
    pub fn run_restores(&self, fns: &[RestoreFn]) {
        for f in fns {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(self)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_is_independent_copy() {
        let mut parent = Context::new();
        parent.put("tenant", serde_json::json!("acme"));

        let forked = parent.fork();
        let mut child = Context::init(forked);

        parent.put("tenant", serde_json::json!("other"));
        child.put("trace", serde_json::json!("t1"));

        assert_eq!(parent.fetch("tenant", Value::Null), serde_json::json!("other"));
        assert_eq!(child.fetch("tenant", Value::Null), serde_json::json!("acme"));
        assert_eq!(parent.fetch("trace", Value::Null), Value::Null);
    }

    #[test]
    fn fork_with_middleware_applies_hooks_and_carries_restore_fns() {
        let mut parent = Context::new();
        parent.put("tenant", serde_json::json!("acme"));
        parent.add_restore_fn(Arc::new(|ctx: &Context| {
            // can't mutate parent state here, but exercised via run_restores below
            let _ = ctx.fetch("tenant", Value::Null);
        }));

        let (map, fns) = parent.fork_with_middleware(|mut map| {
            map.insert("injected".to_string(), serde_json::json!(true));
            map
        });

        assert_eq!(fns.len(), 1);
        assert_eq!(map.get("injected"), Some(&serde_json::json!(true)));

        let child = Context::init_with_restores(map, fns);
        assert_eq!(child.fetch("tenant", Value::Null), serde_json::json!("acme"));
    }

    #[test]
    fn fetch_missing_key_returns_default() {
        let ctx = Context::new();
        assert_eq!(ctx.fetch("missing", serde_json::json!(42)), serde_json::json!(42));
    }

    #[test]
    fn merge_overwrites_existing_keys() {
        let mut ctx = Context::new();
        ctx.put("a", serde_json::json!(1));
        let mut incoming = HashMap::new();
        incoming.insert("a".to_string(), serde_json::json!(2));
        incoming.insert("b".to_string(), serde_json::json!(3));
        ctx.merge(incoming);
        assert_eq!(ctx.fetch("a", Value::Null), serde_json::json!(2));
        assert_eq!(ctx.fetch("b", Value::Null), serde_json::json!(3));
    }
}
