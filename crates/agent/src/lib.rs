//! Agent execution for the steward runtime.
//!
//! [`AgentRunner`] drives the plan-act-checkpoint loop against an
//! [`steward_store::AgentStateStore`] and a planning [`steward_core::Llm`].
//! Built-in control functions, terminal-notification handlers, and the
//! working-directory scope utilities live alongside it.

pub mod builtins;
pub mod completed;
pub mod planning;
pub mod runner;
pub mod workdir;

pub use builtins::{
    builtin_names, register_builtins, AGENT_COMPLETED, AGENT_DELETE_MEMORY,
    AGENT_REQUEST_FEEDBACK, AGENT_SAVE_MEMORY,
};
pub use completed::{CompletedHandler, CompletedHandlerRegistry};
pub use planning::{build_planning_messages, parse_function_calls};
pub use runner::{AgentRunner, Resume, StartSpec};
pub use workdir::{agent_dir, git_root, scm_clone_dir, system_dir, WorkingDirGuard};
