//! LLM message value types.
//!
//! These are the core value objects that flow through the runtime:
//! an agent's durable conversation, the request payload of every provider
//! call, and the reconstructed output of the LLM call store.

use serde::{Deserialize, Serialize};

use crate::function::FunctionCall;

/// The role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instructions
    System,
    /// The end user
    User,
    /// The LLM
    Assistant,
    /// Function execution result
    Tool,
}

/// One part of a multi-part message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        /// URL or data URI of the image.
        image: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    File {
        filename: String,
        /// Base64-encoded file bytes.
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    Reasoning {
        text: String,
    },
    RedactedReasoning {
        data: String,
    },
}

/// Message body: either a plain string or an ordered sequence of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Flatten the content to its visible text.
    ///
    /// Reasoning and redacted-reasoning parts are excluded; they are not
    /// part of what downstream consumers (fingerprinting, prompt reuse)
    /// treat as the message text.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(s) => s.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

/// Prompt-cache marker on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMarker {
    Ephemeral,
}

/// Usage statistics stamped onto an assistant message by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct GenerationStats {
    /// Wall-clock time the request was issued, epoch ms.
    pub request_time: i64,
    /// Milliseconds until the first token arrived.
    pub time_to_first_token: i64,
    /// Total generation time in milliseconds.
    pub total_time: i64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// USD cost of this call.
    pub cost: f64,
    /// Which provider produced the response.
    pub llm_id: String,
}

/// A single message in an LLM conversation.
///
/// Unknown fields are rejected on deserialization: the wire shape is the
/// contract, and legacy payloads with stray fields must not round-trip
/// silently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmMessage {
    pub role: MessageRole,

    pub content: MessageContent,

    /// Function-call intents emitted by the planning LLM.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_calls: Vec<FunctionCall>,

    /// Prompt-cache marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheMarker>,

    /// Generation statistics (assistant messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<GenerationStats>,
}

impl LlmMessage {
    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            function_calls: Vec::new(),
            cache: None,
            stats: None,
        }
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            function_calls: Vec::new(),
            cache: None,
            stats: None,
        }
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            function_calls: Vec::new(),
            cache: None,
            stats: None,
        }
    }

    /// An assistant message carrying function-call intents.
    pub fn assistant_with_calls(
        content: impl Into<MessageContent>,
        calls: Vec<FunctionCall>,
    ) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            function_calls: calls,
            cache: None,
            stats: None,
        }
    }

    pub fn tool(content: impl Into<MessageContent>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            function_calls: Vec::new(),
            cache: None,
            stats: None,
        }
    }

    /// Mark this message for ephemeral prompt caching.
    pub fn cached(mut self) -> Self {
        self.cache = Some(CacheMarker::Ephemeral);
        self
    }

    pub fn with_stats(mut self, stats: GenerationStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// The flattened text of the message body.
    pub fn text(&self) -> String {
        self.content.text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_roundtrip() {
        let msg = LlmMessage::user("Hello, agent!");
        let json = serde_json::to_string(&msg).unwrap();
        let back: LlmMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.text(), "Hello, agent!");
    }

    #[test]
    fn parts_roundtrip() {
        let msg = LlmMessage::user(MessageContent::Parts(vec![
            ContentPart::Text {
                text: "look at this".into(),
            },
            ContentPart::Image {
                image: "https://example.com/x.png".into(),
                mime_type: Some("image/png".into()),
            },
        ]));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"image\""));
        let back: LlmMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn text_excludes_reasoning_parts() {
        let msg = LlmMessage::assistant(MessageContent::Parts(vec![
            ContentPart::Reasoning {
                text: "thinking...".into(),
            },
            ContentPart::Text {
                text: "the answer".into(),
            },
        ]));
        assert_eq!(msg.text(), "the answer");
    }

    #[test]
    fn redacted_reasoning_tag() {
        let part = ContentPart::RedactedReasoning { data: "opaque".into() };
        let json = serde_json::to_string(&part).unwrap();
        assert!(json.contains("redacted-reasoning"));
    }

    #[test]
    fn unknown_fields_rejected() {
        // Legacy payloads push stray fields (e.g. `value`); the shape check
        // must reject them rather than carry them silently.
        let raw = r#"{"role":"user","content":"hi","value":"legacy"}"#;
        let parsed: std::result::Result<LlmMessage, _> = serde_json::from_str(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn cache_marker_serializes_lowercase() {
        let msg = LlmMessage::system("rules").cached();
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"ephemeral\""));
    }
}
