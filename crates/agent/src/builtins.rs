//! Built-in agent control functions.
//!
//! These are bound into every agent regardless of its configured capability
//! set. The runner intercepts them by name: `agent_completed` and
//! `agent_request_feedback` drive terminal/HIL transitions, the memory pair
//! mutates the agent's scratch space.

use std::sync::Arc;

use async_trait::async_trait;
use steward_core::function::{
    AgentFunction, FunctionCall, FunctionOutcome, FunctionRegistry, FunctionSchema,
};
use steward_core::FunctionError;

pub const AGENT_COMPLETED: &str = "agent_completed";
pub const AGENT_REQUEST_FEEDBACK: &str = "agent_request_feedback";
pub const AGENT_SAVE_MEMORY: &str = "agent_save_memory";
pub const AGENT_DELETE_MEMORY: &str = "agent_delete_memory";

/// The built-in function class names, in binding order.
pub fn builtin_names() -> Vec<String> {
    vec![
        AGENT_COMPLETED.into(),
        AGENT_REQUEST_FEEDBACK.into(),
        AGENT_SAVE_MEMORY.into(),
        AGENT_DELETE_MEMORY.into(),
    ]
}

/// Register all built-ins into `registry`.
pub fn register_builtins(registry: &mut FunctionRegistry) {
    registry.register(Arc::new(Completed::new()));
    registry.register(Arc::new(RequestFeedback::new()));
    registry.register(Arc::new(SaveMemory::new()));
    registry.register(Arc::new(DeleteMemory::new()));
}

macro_rules! marker_function {
    ($name:ident, $doc:expr) => {
        pub struct $name {
            schema: FunctionSchema,
        }

        #[async_trait]
        impl AgentFunction for $name {
            fn schema(&self) -> &FunctionSchema {
                &self.schema
            }

            // The runner intercepts this call before dispatch; reaching the
            // body means it was invoked outside an agent loop.
            async fn call(&self, call: &FunctionCall) -> Result<FunctionOutcome, FunctionError> {
                Err(FunctionError::ExecutionFailed {
                    function: call.function_name.clone(),
                    reason: concat!($doc, " is only meaningful inside an agent execution").into(),
                    fatal: false,
                })
            }
        }
    };
}

marker_function!(Completed, "agent_completed");
marker_function!(RequestFeedback, "agent_request_feedback");
marker_function!(SaveMemory, "agent_save_memory");
marker_function!(DeleteMemory, "agent_delete_memory");

impl Completed {
    pub fn new() -> Self {
        Self {
            schema: FunctionSchema::new(
                AGENT_COMPLETED,
                "Signal that the task is finished. Call this exactly once, when no further work remains.",
            )
            .param("note", "string", "Summary of what was accomplished", true),
        }
    }
}

impl Default for Completed {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestFeedback {
    pub fn new() -> Self {
        Self {
            schema: FunctionSchema::new(
                AGENT_REQUEST_FEEDBACK,
                "Pause and ask a human a question. Execution resumes when the answer arrives.",
            )
            .param("request", "string", "The question for the human", true),
        }
    }
}

impl Default for RequestFeedback {
    fn default() -> Self {
        Self::new()
    }
}

impl SaveMemory {
    pub fn new() -> Self {
        Self {
            schema: FunctionSchema::new(
                AGENT_SAVE_MEMORY,
                "Store a value in agent memory under a key, replacing any previous value.",
            )
            .param("key", "string", "Memory key", true)
            .param("content", "string", "Value to store", true),
        }
    }
}

impl Default for SaveMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl DeleteMemory {
    pub fn new() -> Self {
        Self {
            schema: FunctionSchema::new(AGENT_DELETE_MEMORY, "Remove a key from agent memory.")
                .param("key", "string", "Memory key", true),
        }
    }
}

impl Default for DeleteMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_gains_all_builtins() {
        let mut registry = FunctionRegistry::new();
        register_builtins(&mut registry);
        for name in builtin_names() {
            assert!(registry.contains(&name), "missing builtin {name}");
        }
    }

    #[tokio::test]
    async fn direct_invocation_is_rejected() {
        let completed = Completed::new();
        let err = completed
            .call(&FunctionCall::new(AGENT_COMPLETED))
            .await
            .unwrap_err();
        assert!(!err.is_fatal());
    }
}
