//! The durable record of one LLM interaction, and its document layout.
//!
//! A logically single [`LlmCall`] is persisted as one head document when it
//! fits the size ceiling, or as a head plus N chunk documents otherwise. The
//! head carries all metadata; chunks carry ordered message subsets sharing
//! the call id. Reassembly concatenates chunks in ascending index order.

use serde::{Deserialize, Serialize};
use steward_core::agent::now_ms;
use steward_core::message::{GenerationStats, LlmMessage};
use steward_core::StoreError;
use uuid::Uuid;

use crate::chunk::{plan_chunks, ChunkPlan};

/// One LLM interaction: the request messages plus, after the response
/// arrives, the assistant reply and its usage stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCall {
    /// Record id; equals `llm_call_id` for the head record.
    pub id: String,

    /// Stable across chunking.
    pub llm_call_id: String,

    pub llm_id: String,

    /// Epoch ms the request was issued.
    pub request_time: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_first_token: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_time: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,

    /// Full conversation, including the assistant response once recorded.
    #[serde(default)]
    pub messages: Vec<LlmMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_stack: Option<String>,

    /// 0 when unchunked, N when split across N chunk documents.
    #[serde(default)]
    pub chunk_count: u32,
}

impl LlmCall {
    /// A new request record. The response is attached later via
    /// [`LlmCall::record_response`].
    pub fn request(llm_id: impl Into<String>, messages: Vec<LlmMessage>) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            llm_call_id: id.clone(),
            id,
            llm_id: llm_id.into(),
            request_time: now_ms(),
            time_to_first_token: None,
            total_time: None,
            cost: None,
            input_tokens: None,
            output_tokens: None,
            messages,
            description: None,
            agent_id: None,
            user_id: None,
            call_stack: None,
            chunk_count: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_attribution(
        mut self,
        agent_id: Option<String>,
        user_id: Option<String>,
        call_stack: Option<String>,
    ) -> Self {
        self.agent_id = agent_id;
        self.user_id = user_id;
        self.call_stack = call_stack;
        self
    }

    /// Append the assistant response and copy its usage stats onto the call.
    pub fn record_response(&mut self, response: LlmMessage) {
        if let Some(stats) = &response.stats {
            self.apply_stats(stats);
        }
        self.messages.push(response);
    }

    fn apply_stats(&mut self, stats: &GenerationStats) {
        self.time_to_first_token = Some(stats.time_to_first_token);
        self.total_time = Some(stats.total_time);
        self.cost = Some(stats.cost);
        self.input_tokens = Some(stats.input_tokens);
        self.output_tokens = Some(stats.output_tokens);
    }
}

/// One backing document: either a head (`chunk_index` absent) or a chunk
/// (`chunk_index` ≥ 1 and a message subset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCallDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,

    /// Record fields. On chunk documents only `id`, `llm_call_id`,
    /// `request_time` and `messages` are meaningful.
    #[serde(flatten)]
    pub call: LlmCall,
}

impl LlmCallDoc {
    pub fn is_head(&self) -> bool {
        self.chunk_index.is_none()
    }

    pub fn doc_id(&self) -> &str {
        &self.call.id
    }

    pub fn llm_call_id(&self) -> &str {
        &self.call.llm_call_id
    }
}

/// Lay out a call as documents per the chunk plan.
///
/// The head document always comes first. When chunked, the head carries no
/// messages and `chunk_count = N`; chunk ids are `<llm_call_id>-<index>`.
pub fn to_documents(call: &LlmCall) -> Result<Vec<LlmCallDoc>, StoreError> {
    let mut head_meta = call.clone();
    head_meta.messages = Vec::new();
    head_meta.chunk_count = 0;
    let metadata_size = serde_json::to_string(&head_meta)?.len();

    match plan_chunks(&call.messages, metadata_size)? {
        ChunkPlan::Inline => {
            let mut head = call.clone();
            head.chunk_count = 0;
            Ok(vec![LlmCallDoc {
                chunk_index: None,
                call: head,
            }])
        }
        ChunkPlan::Chunked(ranges) => {
            head_meta.chunk_count = ranges.len() as u32;
            let mut docs = vec![LlmCallDoc {
                chunk_index: None,
                call: head_meta,
            }];
            for (i, range) in ranges.into_iter().enumerate() {
                let index = (i + 1) as u32;
                let mut chunk_call = LlmCall::request(call.llm_id.clone(), Vec::new());
                chunk_call.llm_call_id = call.llm_call_id.clone();
                chunk_call.id = format!("{}-{}", call.llm_call_id, index);
                chunk_call.request_time = call.request_time;
                chunk_call.messages = call.messages[range].to_vec();
                docs.push(LlmCallDoc {
                    chunk_index: Some(index),
                    call: chunk_call,
                });
            }
            Ok(docs)
        }
    }
}

/// Reassemble a call from its head and chunk documents.
///
/// Chunks are sorted by index and concatenated. A count mismatch is lossy,
/// not fatal: it logs a warning and returns what was found.
pub fn from_documents(head: LlmCallDoc, mut chunks: Vec<LlmCallDoc>) -> LlmCall {
    let mut call = head.call;
    if call.chunk_count == 0 {
        return call;
    }

    chunks.sort_by_key(|c| c.chunk_index.unwrap_or(0));
    if chunks.len() as u32 != call.chunk_count {
        tracing::warn!(
            llm_call_id = %call.llm_call_id,
            expected = call.chunk_count,
            found = chunks.len(),
            "Chunk count mismatch; reconstructing from what was found"
        );
    }
    call.messages = chunks.into_iter().flat_map(|c| c.call.messages).collect();
    call
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{serialized_size, CHUNK_ENVELOPE, MAX_DOC_SIZE};
    use steward_core::message::LlmMessage;

    fn message_of_size(target: usize) -> LlmMessage {
        let base = serialized_size(&LlmMessage::user("")).unwrap();
        LlmMessage::user("a".repeat(target - base))
    }

    #[test]
    fn small_call_is_one_head_document() {
        let call = LlmCall::request("mock", vec![LlmMessage::user("hi")]);
        let docs = to_documents(&call).unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].is_head());
        assert_eq!(docs[0].call.chunk_count, 0);
        assert_eq!(docs[0].call.messages.len(), 1);
    }

    #[test]
    fn oversized_call_chunks_and_reassembles() {
        let size = MAX_DOC_SIZE * 6 / 10;
        let messages = vec![
            message_of_size(size),
            message_of_size(size),
            message_of_size(size),
        ];
        let call = LlmCall::request("mock", messages.clone());

        let docs = to_documents(&call).unwrap();
        let head = docs[0].clone();
        assert!(head.is_head());
        assert!(head.call.messages.is_empty(), "chunked head carries no messages");
        assert!(head.call.chunk_count >= 2);

        let chunks: Vec<_> = docs[1..].to_vec();
        assert_eq!(chunks.len() as u32, head.call.chunk_count);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, Some((i + 1) as u32));
            assert_eq!(chunk.llm_call_id(), call.llm_call_id);
        }

        let rebuilt = from_documents(head, chunks);
        assert_eq!(rebuilt.messages, messages);
    }

    #[test]
    fn reassembly_tolerates_out_of_order_chunks() {
        let size = MAX_DOC_SIZE * 6 / 10;
        let call = LlmCall::request(
            "mock",
            vec![message_of_size(size), message_of_size(size)],
        );
        let docs = to_documents(&call).unwrap();
        let head = docs[0].clone();
        let mut chunks: Vec<_> = docs[1..].to_vec();
        chunks.reverse();

        let rebuilt = from_documents(head, chunks);
        assert_eq!(rebuilt.messages, call.messages);
    }

    #[test]
    fn missing_chunk_is_lossy_not_fatal() {
        let size = MAX_DOC_SIZE * 6 / 10;
        let call = LlmCall::request(
            "mock",
            vec![message_of_size(size), message_of_size(size)],
        );
        let docs = to_documents(&call).unwrap();
        let head = docs[0].clone();
        let chunks = vec![docs[1].clone()]; // drop the second chunk

        let rebuilt = from_documents(head, chunks);
        assert_eq!(rebuilt.messages.len(), 1);
    }

    #[test]
    fn single_message_too_large_is_unrecoverable() {
        let call = LlmCall::request(
            "mock",
            vec![message_of_size(MAX_DOC_SIZE - CHUNK_ENVELOPE + 1)],
        );
        assert!(matches!(
            to_documents(&call),
            Err(StoreError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn response_stats_land_on_the_call() {
        let mut call = LlmCall::request("mock", vec![LlmMessage::user("q")]);
        let response = LlmMessage::assistant("a").with_stats(GenerationStats {
            request_time: call.request_time,
            time_to_first_token: 120,
            total_time: 900,
            input_tokens: 10,
            output_tokens: 5,
            cost: 0.0004,
            llm_id: "mock".into(),
        });
        call.record_response(response);
        assert_eq!(call.messages.len(), 2);
        assert_eq!(call.input_tokens, Some(10));
        assert_eq!(call.output_tokens, Some(5));
        assert!(call.cost.unwrap() > 0.0);
    }
}
