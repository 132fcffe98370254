//! Task-local `Context` propagation.
//!
//! Grounded on the `Context` rationale in `sg_domain::context`: a task the
//! worker spawns (tool execution, a middleware background task) must have
//! the ambient map explicitly re-initialized inside it, since a
//! cooperatively-scheduled task is not guaranteed to inherit thread-local
//! storage. `tokio::task_local!` gives each spawned task its own private
//! slot without any cross-task sharing.

use sg_domain::Context;
use std::future::Future;

tokio::task_local! {
    static CURRENT: Context;
}

/// Run `fut` with `ctx` installed as the task-local `Context` for its
/// duration. Mirrors the worker-side `init(ctx)` call that must happen
/// before any spawned task runs.
pub async fn scope<F: Future>(ctx: Context, fut: F) -> F::Output {
    CURRENT.scope(ctx, fut).await
}

/// Read the ambient context of the currently-running scoped task. Panics
/// outside a `scope` call, the same way `thread::current()` would outside
/// a thread — tools that need ambient values should only call this from
/// inside tool execution, which is always scoped.
pub fn current<R>(f: impl FnOnce(&Context) -> R) -> R {
    CURRENT.with(f)
}
