//! Composite fallback LLM — an ordered provider chain with capability and
//! error fallback.
//!
//! Each provider is skipped when unconfigured or when the estimated input
//! token count exceeds its limit; a failing provider is logged and the walk
//! continues. Only an exhausted chain fails.

use std::sync::Arc;

use async_trait::async_trait;
use steward_core::llm::{GenerateOpts, Llm};
use steward_core::message::LlmMessage;
use steward_core::token::estimate_messages_tokens;
use steward_core::LlmError;
use tracing::{info, warn};

/// An `Llm` that walks an ordered list of backends by priority.
pub struct FallbackLlm {
    id: String,
    chain: Vec<Arc<dyn Llm>>,
}

impl FallbackLlm {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            chain: Vec::new(),
        }
    }

    /// Append a provider at the lowest priority so far.
    pub fn add(mut self, llm: Arc<dyn Llm>) -> Self {
        self.chain.push(llm);
        self
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

#[async_trait]
impl Llm for FallbackLlm {
    fn id(&self) -> &str {
        &self.id
    }

    /// The composite is configured only when every provider is.
    fn is_configured(&self) -> bool {
        !self.chain.is_empty() && self.chain.iter().all(|l| l.is_configured())
    }

    /// The largest input any provider in the chain accepts.
    fn max_input_tokens(&self) -> usize {
        self.chain
            .iter()
            .map(|l| l.max_input_tokens())
            .max()
            .unwrap_or(0)
    }

    async fn generate(
        &self,
        messages: &[LlmMessage],
        opts: &GenerateOpts,
    ) -> Result<LlmMessage, LlmError> {
        let input_tokens = estimate_messages_tokens(messages);
        let mut last_error = String::from("no providers in chain");

        for (i, llm) in self.chain.iter().enumerate() {
            if !llm.is_configured() {
                info!(llm = %llm.id(), "Fallback: provider not configured, skipping");
                continue;
            }
            if input_tokens > llm.max_input_tokens() {
                info!(
                    llm = %llm.id(),
                    input_tokens,
                    limit = llm.max_input_tokens(),
                    "Fallback: input exceeds provider limit, skipping"
                );
                continue;
            }

            info!(
                llm = %llm.id(),
                attempt = i + 1,
                total = self.chain.len(),
                "Fallback: trying provider"
            );
            match llm.generate(messages, opts).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(llm = %llm.id(), error = %e, "Fallback: provider failed, trying next");
                    last_error = format!("{}: {e}", llm.id());
                }
            }
        }

        Err(LlmError::AllProvidersFailed { last: last_error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// A scripted mock backend.
    struct MockLlm {
        id: String,
        configured: bool,
        max_input: usize,
        outcome: Result<String, &'static str>,
        calls: Mutex<usize>,
    }

    impl MockLlm {
        fn ok(id: &str, response: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                configured: true,
                max_input: 1_000_000,
                outcome: Ok(response.into()),
                calls: Mutex::new(0),
            })
        }

        fn failing(id: &str, reason: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                configured: true,
                max_input: 1_000_000,
                outcome: Err(reason),
                calls: Mutex::new(0),
            })
        }

        fn unconfigured(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                configured: false,
                max_input: 1_000_000,
                outcome: Err("never reached"),
                calls: Mutex::new(0),
            })
        }

        fn with_limit(id: &str, max_input: usize) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                configured: true,
                max_input,
                outcome: Ok("limited-ok".into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Llm for MockLlm {
        fn id(&self) -> &str {
            &self.id
        }
        fn is_configured(&self) -> bool {
            self.configured
        }
        fn max_input_tokens(&self) -> usize {
            self.max_input
        }
        async fn generate(
            &self,
            _messages: &[LlmMessage],
            _opts: &GenerateOpts,
        ) -> Result<LlmMessage, LlmError> {
            *self.calls.lock().unwrap() += 1;
            match &self.outcome {
                Ok(text) => Ok(LlmMessage::assistant(text.clone())),
                Err(reason) => Err(LlmError::Network((*reason).into())),
            }
        }
    }

    fn large_input(tokens: usize) -> Vec<LlmMessage> {
        vec![LlmMessage::user("a".repeat(tokens * 4))]
    }

    #[tokio::test]
    async fn first_healthy_provider_wins() {
        let p1 = MockLlm::ok("p1", "from-p1");
        let p2 = MockLlm::ok("p2", "from-p2");
        let fallback = FallbackLlm::new("composite").add(p1.clone()).add(p2.clone());

        let response = fallback
            .generate(&[LlmMessage::user("q")], &GenerateOpts::default())
            .await
            .unwrap();
        assert_eq!(response.text(), "from-p1");
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 0);
    }

    #[tokio::test]
    async fn skips_unconfigured_and_over_limit_providers() {
        // Spec scenario: [P1 unconfigured, P2 max 1000, P3] with 2000 input
        // tokens. P1 and P2 are skipped without an attempt, P3 is attempted.
        let p1 = MockLlm::unconfigured("p1");
        let p2 = MockLlm::with_limit("p2", 1000);
        let p3 = MockLlm::ok("p3", "from-p3");
        let fallback = FallbackLlm::new("composite")
            .add(p1.clone())
            .add(p2.clone())
            .add(p3.clone());

        let response = fallback
            .generate(&large_input(2000), &GenerateOpts::default())
            .await
            .unwrap();
        assert_eq!(response.text(), "from-p3");
        assert_eq!(p1.calls(), 0);
        assert_eq!(p2.calls(), 0);
        assert_eq!(p3.calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_chain_fails_with_all_providers_failed() {
        let p1 = MockLlm::unconfigured("p1");
        let p2 = MockLlm::with_limit("p2", 1000);
        let p3 = MockLlm::failing("p3", "conn refused");
        let fallback = FallbackLlm::new("composite")
            .add(p1)
            .add(p2)
            .add(p3.clone());

        let err = fallback
            .generate(&large_input(2000), &GenerateOpts::default())
            .await
            .unwrap_err();
        match err {
            LlmError::AllProvidersFailed { last } => {
                assert!(last.contains("p3"), "last error should name p3: {last}")
            }
            other => panic!("expected AllProvidersFailed, got {other:?}"),
        }
        assert_eq!(p3.calls(), 1);
    }

    #[tokio::test]
    async fn error_falls_through_to_next_provider() {
        let p1 = MockLlm::failing("p1", "boom");
        let p2 = MockLlm::ok("p2", "recovered");
        let fallback = FallbackLlm::new("composite").add(p1.clone()).add(p2.clone());

        let response = fallback
            .generate(&[LlmMessage::user("q")], &GenerateOpts::default())
            .await
            .unwrap();
        assert_eq!(response.text(), "recovered");
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 1);
    }

    #[test]
    fn composite_capability_surface() {
        let fallback = FallbackLlm::new("composite")
            .add(MockLlm::with_limit("small", 1000))
            .add(MockLlm::with_limit("big", 200_000));
        assert!(fallback.is_configured());
        assert_eq!(fallback.max_input_tokens(), 200_000);

        let with_gap = FallbackLlm::new("composite")
            .add(MockLlm::ok("ok", "x"))
            .add(MockLlm::unconfigured("missing-key"));
        assert!(!with_gap.is_configured());

        assert!(!FallbackLlm::new("empty").is_configured());
    }
}
