use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{ConfigError, ConfigSeverity};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline behaviour
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Orchestrator and clarification-policy switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// When false, low-confidence turns go straight to fallback instead of
    /// asking a clarifying question.
    #[serde(default = "d_true")]
    pub enable_clarification: bool,

    /// Allow the clarification policy to rephrase its question through the
    /// LLM gateway.
    #[serde(default = "d_true")]
    pub enable_llm_fallback: bool,

    /// Per-session cap on consecutive clarifying questions.
    #[serde(default = "d_max_clarifications")]
    pub max_clarification_attempts: u32,

    /// Confidence at or above which the pipeline answers directly.
    #[serde(default = "d_threshold_ok")]
    pub confidence_threshold_ok: f32,

    /// Confidence at or above which the pipeline may ask a clarifying
    /// question; below it the turn falls back.
    #[serde(default = "d_threshold_clarify")]
    pub confidence_threshold_clarify: f32,

    /// Intent tags that demand the retrieval stage.
    #[serde(default = "d_retrieval_intents")]
    pub retrieval_intents: Vec<String>,

    /// Trailing history entries sent to the gateway.
    #[serde(default = "d_history_window")]
    pub history_window: usize,

    /// Per-deployment overrides of the user-visible fallback messages,
    /// keyed by wire error code (e.g. `TIMEOUT_GENERATION`).
    #[serde(default)]
    pub fallback_messages: HashMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_clarification: true,
            enable_llm_fallback: true,
            max_clarification_attempts: d_max_clarifications(),
            confidence_threshold_ok: d_threshold_ok(),
            confidence_threshold_clarify: d_threshold_clarify(),
            retrieval_intents: d_retrieval_intents(),
            history_window: d_history_window(),
            fallback_messages: HashMap::new(),
        }
    }
}

impl PipelineConfig {
    pub(super) fn validate(&self, issues: &mut Vec<ConfigError>) {
        for (field, value) in [
            ("pipeline.confidence_threshold_ok", self.confidence_threshold_ok),
            (
                "pipeline.confidence_threshold_clarify",
                self.confidence_threshold_clarify,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                issues.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: field.into(),
                    message: format!("must be within [0, 1] (got {value})"),
                });
            }
        }

        if self.confidence_threshold_clarify > self.confidence_threshold_ok {
            issues.push(ConfigError::error(
                "pipeline.confidence_threshold_clarify",
                "must not exceed confidence_threshold_ok",
            ));
        }

        if self.max_clarification_attempts == 0 {
            issues.push(ConfigError::warning(
                "pipeline.max_clarification_attempts",
                "is 0 — clarification is effectively disabled",
            ));
        }

        if self.history_window == 0 {
            issues.push(ConfigError::warning(
                "pipeline.history_window",
                "is 0 — the gateway will see no conversation history",
            ));
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_max_clarifications() -> u32 {
    3
}
fn d_threshold_ok() -> f32 {
    0.70
}
fn d_threshold_clarify() -> f32 {
    0.40
}
fn d_retrieval_intents() -> Vec<String> {
    vec![
        "research".into(),
        "document_analysis".into(),
        "data_analysis".into(),
        "multi_step_task".into(),
    ]
}
fn d_history_window() -> usize {
    10
}
