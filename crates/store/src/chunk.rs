//! Greedy message packing for the per-document size ceiling.
//!
//! Backing documents have a hard size limit. A logically single LLM call
//! whose messages exceed it is split across chunk documents; the planner
//! here decides the split and is shared by every adapter so the invariants
//! hold regardless of backend.

use steward_core::message::LlmMessage;
use steward_core::StoreError;

/// Hard ceiling on one backing document, bytes of serialized JSON.
pub const MAX_DOC_SIZE: usize = 1_000_000;

/// Bytes reserved in each chunk document for its envelope: the record id,
/// the shared call id, the chunk index, and serialization framing.
pub const CHUNK_ENVELOPE: usize = 1024;

/// Serialized size of one message, in bytes.
pub fn serialized_size(message: &LlmMessage) -> Result<usize, StoreError> {
    Ok(serde_json::to_string(message)?.len())
}

/// How a message array will be laid out across documents.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkPlan {
    /// Everything fits in the head document.
    Inline,
    /// Messages split across chunk documents; each inner range is one chunk,
    /// expressed as indexes into the original array. Order is preserved.
    Chunked(Vec<std::ops::Range<usize>>),
}

impl ChunkPlan {
    pub fn chunk_count(&self) -> u32 {
        match self {
            ChunkPlan::Inline => 0,
            ChunkPlan::Chunked(ranges) => ranges.len() as u32,
        }
    }
}

/// Plan the document layout for `messages` given `metadata_size` bytes of
/// head-document metadata.
///
/// Fails with `MessageTooLarge` when a single message cannot fit a chunk
/// envelope; that is unrecoverable and the caller must reduce the message.
pub fn plan_chunks(
    messages: &[LlmMessage],
    metadata_size: usize,
) -> Result<ChunkPlan, StoreError> {
    let sizes = messages
        .iter()
        .map(serialized_size)
        .collect::<Result<Vec<_>, _>>()?;

    // A message that cannot fit a chunk envelope is unrecoverable no matter
    // how the rest of the call is laid out.
    let per_message_limit = MAX_DOC_SIZE - CHUNK_ENVELOPE;
    for (i, &size) in sizes.iter().enumerate() {
        if size > per_message_limit {
            tracing::error!(
                index = i,
                size,
                limit = per_message_limit,
                "Single message exceeds chunk capacity"
            );
            return Err(StoreError::MessageTooLarge {
                size,
                limit: per_message_limit,
            });
        }
    }

    let total: usize = metadata_size + sizes.iter().sum::<usize>();
    if total < MAX_DOC_SIZE {
        return Ok(ChunkPlan::Inline);
    }

    // Greedy packing, preserving order.
    let mut ranges: Vec<std::ops::Range<usize>> = Vec::new();
    let mut start = 0usize;
    let mut current = 0usize;
    for (i, &size) in sizes.iter().enumerate() {
        if i > start && current + size > per_message_limit {
            ranges.push(start..i);
            start = i;
            current = 0;
        }
        current += size;
    }
    if start < sizes.len() {
        ranges.push(start..sizes.len());
    }

    Ok(ChunkPlan::Chunked(ranges))
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_core::message::LlmMessage;

    /// Build a user message whose serialized form is exactly `target` bytes.
    fn message_of_size(target: usize) -> LlmMessage {
        let base = serialized_size(&LlmMessage::user("")).unwrap();
        assert!(target >= base, "target too small: {target} < {base}");
        LlmMessage::user("a".repeat(target - base))
    }

    #[test]
    fn small_conversation_stays_inline() {
        let messages = vec![LlmMessage::user("hi"), LlmMessage::assistant("hello")];
        let plan = plan_chunks(&messages, 256).unwrap();
        assert_eq!(plan, ChunkPlan::Inline);
        assert_eq!(plan.chunk_count(), 0);
    }

    #[test]
    fn message_at_exact_capacity_succeeds() {
        // With heavy metadata the total crosses the ceiling: exactly one
        // chunk. With light metadata the call stays inline. Either way the
        // message is accepted.
        let msg = message_of_size(MAX_DOC_SIZE - CHUNK_ENVELOPE);
        let plan = plan_chunks(std::slice::from_ref(&msg), 2 * CHUNK_ENVELOPE).unwrap();
        match plan {
            ChunkPlan::Chunked(ranges) => assert_eq!(ranges, vec![0..1]),
            ChunkPlan::Inline => panic!("expected chunked plan"),
        }

        let inline = plan_chunks(std::slice::from_ref(&msg), 64).unwrap();
        assert_eq!(inline, ChunkPlan::Inline);
    }

    #[test]
    fn one_byte_over_capacity_fails() {
        let msg = message_of_size(MAX_DOC_SIZE - CHUNK_ENVELOPE + 1);
        let err = plan_chunks(std::slice::from_ref(&msg), 256).unwrap_err();
        match err {
            StoreError::MessageTooLarge { size, limit } => {
                assert_eq!(size, MAX_DOC_SIZE - CHUNK_ENVELOPE + 1);
                assert_eq!(limit, MAX_DOC_SIZE - CHUNK_ENVELOPE);
            }
            other => panic!("expected MessageTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn two_point_six_ratio_messages_make_two_chunks() {
        let size = MAX_DOC_SIZE * 6 / 10;
        let messages = vec![message_of_size(size), message_of_size(size)];
        let plan = plan_chunks(&messages, 256).unwrap();
        match plan {
            ChunkPlan::Chunked(ranges) => {
                assert_eq!(ranges.len(), 2);
                assert_eq!(ranges, vec![0..1, 1..2]);
            }
            ChunkPlan::Inline => panic!("expected chunked plan"),
        }
    }

    #[test]
    fn three_large_messages_preserve_order() {
        let size = MAX_DOC_SIZE * 6 / 10;
        let messages = vec![
            message_of_size(size),
            message_of_size(size),
            message_of_size(size),
        ];
        let plan = plan_chunks(&messages, 256).unwrap();
        match plan {
            ChunkPlan::Chunked(ranges) => {
                assert_eq!(ranges.len(), 3);
                let covered: Vec<usize> = ranges.iter().flat_map(|r| r.clone()).collect();
                assert_eq!(covered, vec![0, 1, 2]);
            }
            ChunkPlan::Inline => panic!("expected chunked plan"),
        }
    }

    #[test]
    fn many_small_messages_pack_together() {
        // 20 messages of ~100 KiB each: total well over the ceiling, but
        // several fit per chunk.
        let messages: Vec<_> = (0..20).map(|_| message_of_size(100_000)).collect();
        let plan = plan_chunks(&messages, 256).unwrap();
        match plan {
            ChunkPlan::Chunked(ranges) => {
                assert!(ranges.len() > 1);
                assert!(ranges.len() < 20, "messages should share chunks");
                let covered: Vec<usize> = ranges.iter().flat_map(|r| r.clone()).collect();
                assert_eq!(covered, (0..20).collect::<Vec<_>>());
            }
            ChunkPlan::Inline => panic!("expected chunked plan"),
        }
    }
}
