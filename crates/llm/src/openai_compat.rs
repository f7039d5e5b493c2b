//! OpenAI-compatible provider.
//!
//! Covers the providers routed through `/v1/chat/completions`-shaped
//! endpoints: OpenRouter, DeepSeek, Groq, SambaNova, Perplexity, and any
//! other compatible host.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use steward_core::agent::now_ms;
use steward_core::llm::{GenerateOpts, Llm};
use steward_core::message::{GenerationStats, LlmMessage, MessageRole};
use steward_core::LlmError;
use tracing::{debug, warn};

use crate::pricing::PricingTable;

/// An LLM served over an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatLlm {
    id: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_input_tokens: usize,
    pricing: PricingTable,
    client: reqwest::Client,
}

impl OpenAiCompatLlm {
    pub fn new(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        max_input_tokens: usize,
    ) -> Result<Self, LlmError> {
        let model = model.into();
        let provider = provider.into();
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            id: format!("{provider}:{model}"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model,
            max_input_tokens,
            pricing: PricingTable::with_defaults(),
            client,
        })
    }

    pub fn openrouter(model: impl Into<String>) -> Result<Self, LlmError> {
        Self::new(
            "openrouter",
            "https://openrouter.ai/api/v1",
            std::env::var("OPENROUTER_API_KEY").ok(),
            model,
            128_000,
        )
    }

    pub fn deepseek(model: impl Into<String>) -> Result<Self, LlmError> {
        Self::new(
            "deepseek",
            "https://api.deepseek.com/v1",
            std::env::var("DEEPSEEK_API_KEY").ok(),
            model,
            64_000,
        )
    }

    pub fn groq(model: impl Into<String>) -> Result<Self, LlmError> {
        Self::new(
            "groq",
            "https://api.groq.com/openai/v1",
            std::env::var("GROQ_API_KEY").ok(),
            model,
            131_072,
        )
    }

    pub fn sambanova(model: impl Into<String>) -> Result<Self, LlmError> {
        Self::new(
            "sambanova",
            "https://api.sambanova.ai/v1",
            std::env::var("SAMBANOVA_API_KEY").ok(),
            model,
            128_000,
        )
    }

    pub fn perplexity(model: impl Into<String>) -> Result<Self, LlmError> {
        Self::new(
            "perplexity",
            "https://api.perplexity.ai",
            std::env::var("PERPLEXITY_KEY").ok(),
            model,
            127_000,
        )
    }

    fn wire_messages(messages: &[LlmMessage]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    MessageRole::System => "system",
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                    MessageRole::Tool => "tool",
                },
                content: m.text(),
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl Llm for OpenAiCompatLlm {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    async fn generate(
        &self,
        messages: &[LlmMessage],
        opts: &GenerateOpts,
    ) -> Result<LlmMessage, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LlmError::NotConfigured(self.id.clone()))?;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: Self::wire_messages(messages),
            temperature: opts.temperature,
            top_p: opts.top_p,
            top_k: opts.top_k,
            frequency_penalty: opts.frequency_penalty,
            presence_penalty: opts.presence_penalty,
            stop: opts.stop_sequences.clone(),
            max_tokens: opts.max_tokens,
        };

        let request_time = now_ms();
        let started = std::time::Instant::now();
        debug!(llm = %self.id, messages = messages.len(), "Sending chat completion request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(format!("{}: {e}", self.id))
                } else {
                    LlmError::Network(format!("{}: {e}", self.id))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(llm = %self.id, status = status.as_u16(), "Provider returned error status");
            return Err(LlmError::Api {
                status_code: status.as_u16(),
                message: body.chars().take(500).collect(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("{}: {e}", self.id)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse(format!("{}: empty choices", self.id)))?;

        let content = choice.message.content.unwrap_or_default();
        let total_time = started.elapsed().as_millis() as i64;
        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        let stats = GenerationStats {
            request_time,
            // Non-streaming call: first token and last arrive together.
            time_to_first_token: total_time,
            total_time,
            input_tokens,
            output_tokens,
            cost: self.pricing.cost(&self.model, input_tokens, output_tokens),
            llm_id: self.id.clone(),
        };
        let message = LlmMessage::assistant(content).with_stats(stats);

        if choice.finish_reason.as_deref() == Some("length") {
            return Err(LlmError::MaxTokensExceeded {
                llm_id: self.id.clone(),
                partial: Box::new(message),
            });
        }

        Ok(message)
    }
}
