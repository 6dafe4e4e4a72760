use std::pin::Pin;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::response::DialogueState;
use crate::stage::PipelineLatency;

/// A boxed async stream, used for streaming turns and gateway responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// One newline-delimited JSON chunk of a streaming turn.
///
/// `sequence_id` increases monotonically within a turn; the `done` chunk is
/// always last and clients must treat it as the terminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub request_id: Uuid,
    pub sequence_id: u64,
    #[serde(flatten)]
    pub payload: StreamPayload,
}

/// Chunk payload variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamPayload {
    /// The pipeline entered a new stage.
    Status { state: DialogueState },

    /// The turn resolved to a clarifying question.
    Clarification { message: String, attempt: u32 },

    /// Incremental generated text.
    Content { delta: String },

    /// The turn failed; the stream closes after this chunk.
    Error {
        code: ErrorCode,
        message: String,
        retryable: bool,
    },

    /// Terminator. `done` is always `true`.
    Done {
        done: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        latency_ms: Option<PipelineLatency>,
    },
}

impl StreamChunk {
    pub fn done(request_id: Uuid, sequence_id: u64, latency_ms: Option<PipelineLatency>) -> Self {
        Self {
            request_id,
            sequence_id,
            payload: StreamPayload::Done {
                done: true,
                latency_ms,
            },
        }
    }

    /// Whether this chunk terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self.payload, StreamPayload::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_flatten_payload_next_to_ids() {
        let chunk = StreamChunk {
            request_id: Uuid::nil(),
            sequence_id: 3,
            payload: StreamPayload::Content {
                delta: "hola".into(),
            },
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["sequence_id"], 3);
        assert_eq!(json["type"], "content");
        assert_eq!(json["delta"], "hola");
    }

    #[test]
    fn done_chunk_carries_done_true() {
        let chunk = StreamChunk::done(Uuid::nil(), 9, None);
        assert!(chunk.is_terminal());
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["done"], true);
    }

    #[test]
    fn error_chunk_round_trips() {
        let chunk = StreamChunk {
            request_id: Uuid::nil(),
            sequence_id: 1,
            payload: StreamPayload::Error {
                code: ErrorCode::TimeoutGeneration,
                message: "deadline".into(),
                retryable: true,
            },
        };
        let json = serde_json::to_string(&chunk).unwrap();
        let back: StreamChunk = serde_json::from_str(&json).unwrap();
        match back.payload {
            StreamPayload::Error { code, retryable, .. } => {
                assert_eq!(code, ErrorCode::TimeoutGeneration);
                assert!(retryable);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
