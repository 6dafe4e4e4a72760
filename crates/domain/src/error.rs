use serde::{Deserialize, Serialize};

use crate::response::{Action, DialogueState};
use crate::stage::Stage;

/// Shared error type used across all charla crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("stage {stage} exceeded its budget")]
    StageTimeout { stage: Stage },

    #[error("stage {stage} aborted: {reason}")]
    StageAborted { stage: Stage, reason: String },

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("analyzer: {0}")]
    Analyzer(String),

    #[error("retrieval: {0}")]
    Retrieval(String),

    #[error("session {session_id} is busy: a turn is already in progress")]
    SessionBusy { session_id: String },

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        from: DialogueState,
        to: DialogueState,
    },

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire error codes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The error-code taxonomy carried on every response envelope.
///
/// `None` is reserved for successful answers; every degraded, clarifying or
/// failed turn carries the code that explains it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    None,
    TimeoutPreprocess,
    TimeoutNlu,
    TimeoutRetrieval,
    TimeoutGeneration,
    #[serde(rename = "UPSTREAM_429")]
    Upstream429,
    #[serde(rename = "UPSTREAM_5XX")]
    Upstream5xx,
    EmptyRetrieval,
    LowConfidence,
    GarbageInput,
    CircuitOpen,
    RateLimited,
}

impl ErrorCode {
    /// Whether the caller is invited to resend the same request after
    /// back-off. Transient upstream conditions and deadline misses are
    /// retryable; semantic failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::TimeoutPreprocess
                | ErrorCode::TimeoutNlu
                | ErrorCode::TimeoutRetrieval
                | ErrorCode::TimeoutGeneration
                | ErrorCode::Upstream429
                | ErrorCode::Upstream5xx
                | ErrorCode::CircuitOpen
                | ErrorCode::RateLimited
        )
    }

    /// The wire action a response with this code carries by default.
    pub fn default_action(&self) -> Action {
        match self {
            ErrorCode::None => Action::Answer,
            ErrorCode::TimeoutPreprocess
            | ErrorCode::TimeoutNlu
            | ErrorCode::TimeoutRetrieval
            | ErrorCode::TimeoutGeneration => Action::DegradedTimeout,
            ErrorCode::Upstream429
            | ErrorCode::Upstream5xx
            | ErrorCode::CircuitOpen
            | ErrorCode::RateLimited => Action::RetrySuggestion,
            ErrorCode::EmptyRetrieval => Action::FallbackKb,
            ErrorCode::LowConfidence => Action::AskClarification,
            ErrorCode::GarbageInput => Action::FallbackGeneric,
        }
    }

    /// Map a timed-out stage to its code. Stages without a dedicated code
    /// (rerank, postprocess) fall back to `TIMEOUT_GENERATION`.
    pub fn for_stage_timeout(stage: Stage) -> Self {
        match stage {
            Stage::Preprocess => ErrorCode::TimeoutPreprocess,
            Stage::Nlu => ErrorCode::TimeoutNlu,
            Stage::Retrieval => ErrorCode::TimeoutRetrieval,
            Stage::Generation | Stage::Rerank | Stage::Postprocess => {
                ErrorCode::TimeoutGeneration
            }
        }
    }

    /// Classify an unstructured upstream failure by sniffing its message.
    ///
    /// Order matters: timeouts first, then rate limits, then server errors,
    /// then open circuits. Anything unrecognized is treated as a server
    /// error.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            ErrorCode::TimeoutGeneration
        } else if lower.contains("429") || lower.contains("rate limit") {
            ErrorCode::Upstream429
        } else if lower.contains("500")
            || lower.contains("502")
            || lower.contains("503")
            || lower.contains("504")
            || lower.contains("5xx")
            || lower.contains("server error")
        {
            ErrorCode::Upstream5xx
        } else if lower.contains("circuit") && lower.contains("open") {
            ErrorCode::CircuitOpen
        } else {
            ErrorCode::Upstream5xx
        }
    }

    /// Classify a library error into a wire code.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::StageTimeout { stage } => ErrorCode::for_stage_timeout(*stage),
            Error::StageAborted { .. } => ErrorCode::TimeoutGeneration,
            Error::Provider { message, .. } => ErrorCode::classify(message),
            Error::Http(message) => ErrorCode::classify(message),
            Error::Retrieval(_) => ErrorCode::EmptyRetrieval,
            _ => ErrorCode::Upstream5xx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_the_taxonomy() {
        let cases = [
            (ErrorCode::None, "NONE"),
            (ErrorCode::TimeoutNlu, "TIMEOUT_NLU"),
            (ErrorCode::Upstream429, "UPSTREAM_429"),
            (ErrorCode::Upstream5xx, "UPSTREAM_5XX"),
            (ErrorCode::EmptyRetrieval, "EMPTY_RETRIEVAL"),
            (ErrorCode::CircuitOpen, "CIRCUIT_OPEN"),
        ];
        for (code, wire) in cases {
            assert_eq!(serde_json::to_string(&code).unwrap(), format!("\"{wire}\""));
        }
    }

    #[test]
    fn retryable_exactly_for_transient_codes() {
        assert!(ErrorCode::TimeoutGeneration.is_retryable());
        assert!(ErrorCode::Upstream429.is_retryable());
        assert!(ErrorCode::Upstream5xx.is_retryable());
        assert!(ErrorCode::CircuitOpen.is_retryable());
        assert!(ErrorCode::RateLimited.is_retryable());

        assert!(!ErrorCode::None.is_retryable());
        assert!(!ErrorCode::EmptyRetrieval.is_retryable());
        assert!(!ErrorCode::LowConfidence.is_retryable());
        assert!(!ErrorCode::GarbageInput.is_retryable());
    }

    #[test]
    fn classify_sniffs_common_failure_messages() {
        assert_eq!(
            ErrorCode::classify("request timed out after 8000ms"),
            ErrorCode::TimeoutGeneration
        );
        assert_eq!(ErrorCode::classify("HTTP 429 Too Many Requests"), ErrorCode::Upstream429);
        assert_eq!(ErrorCode::classify("rate limit exceeded"), ErrorCode::Upstream429);
        assert_eq!(ErrorCode::classify("HTTP 503 unavailable"), ErrorCode::Upstream5xx);
        assert_eq!(ErrorCode::classify("circuit breaker is open"), ErrorCode::CircuitOpen);
        assert_eq!(ErrorCode::classify("something odd"), ErrorCode::Upstream5xx);
    }

    #[test]
    fn unknown_stage_timeouts_map_to_generation() {
        assert_eq!(
            ErrorCode::for_stage_timeout(Stage::Rerank),
            ErrorCode::TimeoutGeneration
        );
        assert_eq!(
            ErrorCode::for_stage_timeout(Stage::Postprocess),
            ErrorCode::TimeoutGeneration
        );
        assert_eq!(
            ErrorCode::for_stage_timeout(Stage::Nlu),
            ErrorCode::TimeoutNlu
        );
    }
}
