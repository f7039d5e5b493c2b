//! LLM backends for the steward runtime.
//!
//! - [`OpenAiCompatLlm`] — HTTP provider for chat-completions endpoints
//! - [`FallbackLlm`] — ordered provider chain with capability/error fallback
//! - [`RecordingLlm`] — wraps any backend, recording every call durably
//! - [`retry::with_retries`] — bounded backoff over transient errors
//! - [`PricingTable`] — per-MTok pricing for cost stamping

pub mod fallback;
pub mod openai_compat;
pub mod pricing;
pub mod recording;
pub mod retry;

pub use fallback::FallbackLlm;
pub use openai_compat::OpenAiCompatLlm;
pub use pricing::{ModelPricing, PricingTable};
pub use recording::RecordingLlm;
pub use retry::with_retries;

use std::sync::Arc;

use steward_core::llm::Llm;
use steward_core::LlmError;

/// The default provider chain: every env-keyed provider in priority order.
///
/// Unconfigured providers stay in the chain; the fallback walk skips them at
/// call time, so a deployment with any one key set still works.
pub fn default_chain() -> Result<FallbackLlm, LlmError> {
    Ok(FallbackLlm::new("default-chain")
        .add(Arc::new(OpenAiCompatLlm::deepseek("deepseek-chat")?))
        .add(Arc::new(OpenAiCompatLlm::groq("llama-3.3-70b-versatile")?))
        .add(Arc::new(OpenAiCompatLlm::sambanova("Meta-Llama-3.3-70B-Instruct")?))
        .add(Arc::new(OpenAiCompatLlm::openrouter("meta-llama/llama-3.3-70b-instruct")?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chain_has_all_providers() {
        let chain = default_chain().unwrap();
        assert_eq!(chain.len(), 4);
    }
}
