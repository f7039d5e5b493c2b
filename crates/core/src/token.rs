//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. The
//! approximation is accurate within ~10% for BPE tokenizers on English text,
//! which is enough for input budgeting and chunk sizing.

use crate::function::FunctionSchema;
use crate::message::LlmMessage;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Estimate tokens for a single message including per-message overhead.
///
/// Each message costs ~4 tokens of overhead for role name, delimiters,
/// and formatting markers in the API wire format.
pub fn estimate_message_tokens(message: &LlmMessage) -> usize {
    let overhead = 4;
    overhead + estimate_tokens(&message.text())
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[LlmMessage]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimate tokens for a function schema (serialized as JSON).
pub fn estimate_schema_tokens(schema: &FunctionSchema) -> usize {
    let json = serde_json::to_string(schema).unwrap_or_default();
    estimate_tokens(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn message_includes_overhead() {
        let msg = LlmMessage::user("test"); // 4 chars → 1 token + 4 overhead = 5
        assert_eq!(estimate_message_tokens(&msg), 5);
    }

    #[test]
    fn multiple_messages() {
        let msgs = vec![LlmMessage::user("hello"), LlmMessage::assistant("world")];
        assert_eq!(estimate_messages_tokens(&msgs), 12);
    }

    #[test]
    fn schema_tokens_nonzero() {
        let schema = FunctionSchema::new("echo", "Echoes back the input").param(
            "text",
            "string",
            "Text to echo",
            true,
        );
        assert!(estimate_schema_tokens(&schema) > 0);
    }
}
