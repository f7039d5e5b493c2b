//! Terminal-notification sinks, registered by handler id.
//!
//! An agent context references its handler by id; the registry resolves the
//! id when the runner reaches a notifying transition. Notification failures
//! log and continue: a broken sink must not change the agent's outcome.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use steward_core::agent::AgentContext;
use tokio::sync::RwLock;
use tracing::warn;

/// A sink notified when an agent reaches a completion-class transition.
#[async_trait]
pub trait CompletedHandler: Send + Sync {
    /// Stable handler id stored on agent contexts.
    fn id(&self) -> &str;

    async fn notify(&self, ctx: &AgentContext);
}

/// Process-wide handler registry.
#[derive(Default)]
pub struct CompletedHandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn CompletedHandler>>>,
}

impl CompletedHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, handler: Arc<dyn CompletedHandler>) {
        self.handlers
            .write()
            .await
            .insert(handler.id().to_string(), handler);
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn CompletedHandler>> {
        self.handlers.read().await.get(id).cloned()
    }

    /// Notify the context's registered handler, if any.
    pub async fn notify(&self, ctx: &AgentContext) {
        let Some(handler_id) = &ctx.completed_handler_id else {
            return;
        };
        match self.get(handler_id).await {
            Some(handler) => handler.notify(ctx).await,
            None => warn!(
                agent_id = %ctx.agent_id,
                handler = %handler_id,
                "Completed handler not registered, skipping notification"
            ),
        }
    }
}
