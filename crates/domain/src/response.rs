//! Response envelope, fluent builder, and the response factories.
//!
//! Every turn produces exactly one envelope. The builder enforces the
//! envelope invariants at `build()` time; the factories cover the three
//! degraded shapes (error, timeout, clarification) so call sites never
//! assemble those by hand.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::stage::{PipelineLatency, Stage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dialogue FSM state, as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueState {
    Idle,
    Preprocessing,
    Analyzing,
    Retrieving,
    Generating,
    Clarifying,
    Success,
    Fallback,
    ErrorDegraded,
    Timeout,
}

impl DialogueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogueState::Idle => "idle",
            DialogueState::Preprocessing => "preprocessing",
            DialogueState::Analyzing => "analyzing",
            DialogueState::Retrieving => "retrieving",
            DialogueState::Generating => "generating",
            DialogueState::Clarifying => "clarifying",
            DialogueState::Success => "success",
            DialogueState::Fallback => "fallback",
            DialogueState::ErrorDegraded => "error_degraded",
            DialogueState::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for DialogueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller should do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Answer,
    AskClarification,
    FallbackKb,
    FallbackGeneric,
    DegradedTimeout,
    EscalateHuman,
    RetrySuggestion,
}

/// Upstream provider family that produced the generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTag {
    Xai,
    Gemini,
    Anthropic,
}

/// Kind of retrieval source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Kb,
    Web,
    Academic,
    Document,
}

/// One retrieval result attached to an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,
}

/// Optional accounting metadata on a response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_fallback: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_mode: Option<bool>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The typed response envelope built exactly once per turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurnResponse {
    pub request_id: Uuid,
    pub session_id: String,
    pub state: DialogueState,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<HashMap<String, serde_json::Value>>,
    pub confidence: f32,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    pub latency_ms: PipelineLatency,
    pub model_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderTag>,
    pub error_code: ErrorCode,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fluent, consuming builder for [`ChatTurnResponse`].
pub struct ResponseBuilder {
    response: ChatTurnResponse,
}

impl ResponseBuilder {
    pub fn new(request_id: Uuid, session_id: impl Into<String>) -> Self {
        Self {
            response: ChatTurnResponse {
                request_id,
                session_id: session_id.into(),
                state: DialogueState::Idle,
                message: String::new(),
                intent: None,
                intent_confidence: None,
                entities: None,
                confidence: 0.0,
                action: Action::Answer,
                sources: None,
                latency_ms: PipelineLatency::default(),
                model_version: String::new(),
                provider: None,
                error_code: ErrorCode::None,
                retryable: false,
                metadata: None,
            },
        }
    }

    pub fn state(mut self, state: DialogueState) -> Self {
        self.response.state = state;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.response.message = message.into();
        self
    }

    pub fn intent(mut self, intent: impl Into<String>, confidence: f32) -> Self {
        self.response.intent = Some(intent.into());
        self.response.intent_confidence = Some(confidence);
        self
    }

    pub fn entities(mut self, entities: HashMap<String, serde_json::Value>) -> Self {
        self.response.entities = Some(entities);
        self
    }

    pub fn confidence(mut self, confidence: f32) -> Self {
        self.response.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.response.action = action;
        self
    }

    pub fn sources(mut self, sources: Vec<Source>) -> Self {
        self.response.sources = Some(sources);
        self
    }

    pub fn latency(mut self, latency: PipelineLatency) -> Self {
        self.response.latency_ms = latency;
        self
    }

    pub fn model(mut self, version: impl Into<String>, provider: Option<ProviderTag>) -> Self {
        self.response.model_version = version.into();
        self.response.provider = provider;
        self
    }

    pub fn error(mut self, code: ErrorCode, retryable: bool) -> Self {
        self.response.error_code = code;
        self.response.retryable = retryable;
        self
    }

    pub fn metadata(mut self, metadata: ResponseMetadata) -> Self {
        self.response.metadata = Some(metadata);
        self
    }

    /// Finish the envelope. An inconsistent envelope is a programming error,
    /// caught in debug builds.
    pub fn build(self) -> ChatTurnResponse {
        let r = &self.response;
        debug_assert_eq!(
            r.error_code == ErrorCode::None,
            r.state == DialogueState::Success && r.action == Action::Answer,
            "error_code NONE must coincide with success/ANSWER (state={}, action={:?}, code={:?})",
            r.state,
            r.action,
            r.error_code,
        );
        debug_assert_eq!(
            r.retryable,
            r.error_code.is_retryable(),
            "retryable flag must follow the error-code taxonomy",
        );
        self.response
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Factories
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Default user-visible text per error code. Deployments override these via
/// `[pipeline.fallback_messages]` in the config file.
pub fn default_fallback_text(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::None => "",
        ErrorCode::TimeoutPreprocess | ErrorCode::TimeoutNlu => {
            "No pude procesar tu mensaje a tiempo. Inténtalo de nuevo."
        }
        ErrorCode::TimeoutRetrieval => {
            "La búsqueda de información tardó demasiado. Inténtalo de nuevo."
        }
        ErrorCode::TimeoutGeneration => {
            "La respuesta tardó demasiado en generarse. Intenta con una pregunta más simple."
        }
        ErrorCode::Upstream429 | ErrorCode::RateLimited => {
            "Estamos recibiendo muchas solicitudes. Espera un momento y vuelve a intentarlo."
        }
        ErrorCode::Upstream5xx | ErrorCode::CircuitOpen => {
            "El servicio no está disponible en este momento. Inténtalo de nuevo en unos minutos."
        }
        ErrorCode::EmptyRetrieval => {
            "No encontré información sobre eso, pero puedo intentar responder con lo que sé."
        }
        ErrorCode::LowConfidence => {
            "No estoy seguro de haber entendido. ¿Puedes reformular tu pregunta?"
        }
        ErrorCode::GarbageInput => {
            "No pude entender tu mensaje. ¿Puedes escribirlo de otra forma?"
        }
    }
}

/// A degraded envelope for an upstream or local failure. Per-stage latency is
/// reported as not reached; only the measured total survives.
pub fn error_response(
    request_id: Uuid,
    session_id: impl Into<String>,
    code: ErrorCode,
    message: impl Into<String>,
    total_ms: u64,
) -> ChatTurnResponse {
    ResponseBuilder::new(request_id, session_id)
        .state(DialogueState::ErrorDegraded)
        .message(message)
        .action(code.default_action())
        .latency(PipelineLatency::unreached(total_ms))
        .error(code, code.is_retryable())
        .metadata(ResponseMetadata {
            degraded_mode: Some(true),
            ..Default::default()
        })
        .build()
}

/// A timeout envelope. Keeps the full latency breakdown so callers can see
/// how far the turn got before the deadline fired.
pub fn timeout_response(
    request_id: Uuid,
    session_id: impl Into<String>,
    stage: Stage,
    latency: PipelineLatency,
) -> ChatTurnResponse {
    let code = ErrorCode::for_stage_timeout(stage);
    ResponseBuilder::new(request_id, session_id)
        .state(DialogueState::Timeout)
        .message(default_fallback_text(code))
        .action(Action::DegradedTimeout)
        .latency(latency)
        .error(code, true)
        .metadata(ResponseMetadata {
            degraded_mode: Some(true),
            ..Default::default()
        })
        .build()
}

/// A clarifying-question envelope.
pub fn clarification_response(
    request_id: Uuid,
    session_id: impl Into<String>,
    question: impl Into<String>,
    confidence: f32,
    attempt: u32,
    latency: PipelineLatency,
) -> ChatTurnResponse {
    ResponseBuilder::new(request_id, session_id)
        .state(DialogueState::Clarifying)
        .message(question)
        .confidence(confidence)
        .action(Action::AskClarification)
        .latency(latency)
        .error(ErrorCode::LowConfidence, false)
        .metadata(ResponseMetadata {
            clarification_attempt: Some(attempt),
            ..Default::default()
        })
        .build()
}
