use serde::Serialize;
use uuid::Uuid;

use crate::response::DialogueState;
use crate::stage::Stage;

/// Structured trace events emitted across all charla crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    RequestStarted {
        request_id: Uuid,
        session_id: String,
        total_budget_ms: u64,
    },
    StageStarted {
        request_id: Uuid,
        stage: Stage,
        budget_ms: u64,
    },
    StageCompleted {
        request_id: Uuid,
        stage: Stage,
        duration_ms: u64,
        within_budget: bool,
    },
    StageTimeout {
        request_id: Uuid,
        stage: Stage,
        budget_ms: u64,
    },
    StageAborted {
        request_id: Uuid,
        stage: Stage,
        reason: String,
    },
    RequestCompleted {
        request_id: Uuid,
        total_ms: u64,
    },
    SessionCreated {
        session_id: String,
    },
    SessionExpired {
        session_id: String,
        idle_ms: u64,
    },
    SessionDestroyed {
        session_id: String,
    },
    InvalidTransition {
        session_id: String,
        from: DialogueState,
        to: DialogueState,
        trigger: String,
    },
    ClarificationTriggered {
        request_id: Uuid,
        session_id: String,
        kind: String,
        attempt: u32,
    },
    LlmRequest {
        provider: String,
        model: String,
        streaming: bool,
        duration_ms: u64,
        tokens: Option<u32>,
    },
    LlmFallback {
        from_model: String,
        to_model: String,
        reason: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "charla_event");
    }
}
