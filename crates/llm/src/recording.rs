//! Call recording — every generate is persisted as an [`LlmCall`] pair of
//! writes around the provider call.
//!
//! The request record is written before the provider is consulted, the full
//! record after the response arrives. Store failures on this path log and
//! continue: recording must never mask the primary outcome.

use std::sync::Arc;

use async_trait::async_trait;
use steward_core::ambient::{current_agent, current_user};
use steward_core::llm::{GenerateOpts, Llm};
use steward_core::message::LlmMessage;
use steward_core::trace::with_span_id;
use steward_core::LlmError;
use steward_store::{LlmCall, LlmCallStore};
use tracing::warn;

use crate::retry::with_retries;

/// Wraps an inner `Llm`, recording every interaction durably and applying
/// the bounded retry policy to transient failures.
pub struct RecordingLlm {
    inner: Arc<dyn Llm>,
    store: Arc<dyn LlmCallStore>,
}

impl RecordingLlm {
    pub fn new(inner: Arc<dyn Llm>, store: Arc<dyn LlmCallStore>) -> Self {
        Self { inner, store }
    }

    fn attribution() -> (Option<String>, Option<String>, Option<String>) {
        let agent = current_agent();
        let agent_id = agent.as_ref().map(|a| a.agent_id.clone());
        let call_stack = agent.as_ref().and_then(|a| {
            if a.call_stack.is_empty() {
                None
            } else {
                Some(a.call_stack.join(" > "))
            }
        });
        let user_id = current_user().ok().map(|u| u.id);
        (agent_id, user_id, call_stack)
    }
}

#[async_trait]
impl Llm for RecordingLlm {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn is_configured(&self) -> bool {
        self.inner.is_configured()
    }

    fn max_input_tokens(&self) -> usize {
        self.inner.max_input_tokens()
    }

    async fn generate(
        &self,
        messages: &[LlmMessage],
        opts: &GenerateOpts,
    ) -> Result<LlmMessage, LlmError> {
        let (agent_id, user_id, call_stack) = Self::attribution();
        let mut call = LlmCall::request(self.inner.id(), messages.to_vec())
            .with_description(opts.description())
            .with_attribution(agent_id, user_id, call_stack);

        if let Err(e) = self.store.save_request(&call).await {
            warn!(llm_call_id = %call.llm_call_id, error = %e, "Failed to record LLM request");
        }

        let inner = &self.inner;
        let response = with_span_id("llm_generate", opts.description(), async {
            with_retries(opts.max_retries, || inner.generate(messages, opts)).await
        })
        .await?;

        call.record_response(response.clone());
        if let Err(e) = self.store.save_response(&call).await {
            warn!(llm_call_id = %call.llm_call_id, error = %e, "Failed to record LLM response");
        }

        Ok(response)
    }
}
