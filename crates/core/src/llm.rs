//! The `Llm` trait — the abstraction over LLM backends.
//!
//! An `Llm` knows how to send a message array to a model and get the
//! assistant's reply back with usage stats attached. Implementations:
//! OpenAI-compatible HTTP endpoints, the composite fallback, mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::message::LlmMessage;

/// Requested depth of extended reasoning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Low,
    Medium,
    High,
}

/// Per-call generation options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateOpts {
    /// Span/description id for tracing and the call store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Clamped to at most 40 on set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingLevel>,
}

fn default_max_retries() -> u32 {
    3
}

impl GenerateOpts {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            max_retries: default_max_retries(),
            ..Self::default()
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    /// Providers reject top_k above 40, so the setter clamps.
    pub fn top_k(mut self, k: u32) -> Self {
        self.top_k = Some(k.min(40));
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn thinking(mut self, level: ThinkingLevel) -> Self {
        self.thinking = Some(level);
        self
    }

    /// The description used for spans and stored call records.
    pub fn description(&self) -> &str {
        self.id.as_deref().unwrap_or("generate")
    }
}

/// The core LLM trait.
#[async_trait]
pub trait Llm: Send + Sync {
    /// Stable provider id, e.g. "openrouter:llama-3.3-70b".
    fn id(&self) -> &str;

    /// Whether credentials/config are present to attempt a call.
    fn is_configured(&self) -> bool;

    /// The largest input, in tokens, this backend accepts.
    fn max_input_tokens(&self) -> usize;

    /// Send the conversation and return the assistant message, with
    /// [`crate::message::GenerationStats`] stamped on it.
    async fn generate(
        &self,
        messages: &[LlmMessage],
        opts: &GenerateOpts,
    ) -> std::result::Result<LlmMessage, LlmError>;
}
