//! Shared types for the charla conversational pipeline.
//!
//! Everything that crosses a crate boundary lives here: the error and
//! error-code taxonomy, the stage enum and latency record, the request and
//! response wire contract, streaming chunk types, structured trace events,
//! and the configuration tree.

pub mod analysis;
pub mod api;
pub mod config;
pub mod error;
pub mod response;
pub mod stage;
pub mod stream;
pub mod trace;

pub use analysis::{AnalysisResult, Complexity, IntentScore};
pub use api::{validate_request, Channel, ChatTurnRequest, FieldError, LanguageHint};
pub use error::{Error, ErrorCode, Result};
pub use response::{
    clarification_response, default_fallback_text, error_response, timeout_response, Action,
    ChatTurnResponse, DialogueState, ProviderTag, ResponseBuilder, ResponseMetadata, Source,
    SourceType,
};
pub use stage::{PipelineLatency, Stage};
pub use stream::{BoxStream, StreamChunk, StreamPayload};
pub use trace::TraceEvent;
