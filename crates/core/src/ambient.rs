//! Ambient context — the current agent and user, without threading them
//! through every call.
//!
//! Bindings are task-local, established by [`run_with_user`] at request
//! boundaries and by the runner before each iteration. Never a thread-global:
//! concurrent agents on the same worker thread must not observe each other's
//! bindings.

use std::future::Future;
use std::sync::Arc;
use std::sync::OnceLock;

use crate::agent::AgentContext;
use crate::error::AgentError;
use crate::user::User;

tokio::task_local! {
    static CURRENT_AGENT: Arc<AgentContext>;
    static CURRENT_USER: User;
}

static SINGLE_USER_MODE: OnceLock<bool> = OnceLock::new();

fn single_user_mode() -> bool {
    *SINGLE_USER_MODE.get_or_init(|| {
        std::env::var("AUTH")
            .map(|v| v == "single_user")
            .unwrap_or(true)
    })
}

/// Force the auth mode, for tests and boot code that must not depend on
/// process environment ordering.
pub fn set_single_user_mode(enabled: bool) {
    let _ = SINGLE_USER_MODE.set(enabled);
}

/// Run `fut` with `user` bound as the ambient user.
pub async fn run_with_user<F>(user: User, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_USER.scope(user, fut).await
}

/// Run `fut` with `ctx` bound as the ambient agent.
///
/// The runner rebinds a fresh snapshot before each iteration so nested calls
/// observe the checkpointed context.
pub async fn run_with_agent<F>(ctx: Arc<AgentContext>, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_AGENT.scope(ctx, fut).await
}

/// The agent bound on this task, if any.
pub fn current_agent() -> Option<Arc<AgentContext>> {
    CURRENT_AGENT.try_with(|ctx| ctx.clone()).ok()
}

/// The user on whose behalf this task runs.
///
/// An agent binding wins over a plain user binding; with neither present the
/// sole user is returned in single-user mode, and `NotBound` otherwise.
pub fn current_user() -> std::result::Result<User, AgentError> {
    if let Ok(user) = CURRENT_AGENT.try_with(|ctx| ctx.user.clone()) {
        return Ok(user);
    }
    if let Ok(user) = CURRENT_USER.try_with(|u| u.clone()) {
        return Ok(user);
    }
    if single_user_mode() {
        return Ok(User::single());
    }
    Err(AgentError::NotBound)
}
