use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::stage::Stage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Watchdog timeouts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deadline configuration for the stage watchdog.
///
/// `aggressive` flips between the two presets; `overrides` pins individual
/// stages regardless of preset. The total budget is authoritative — stage
/// budgets are clamped to whatever remains of it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Select the aggressive preset instead of the default one.
    #[serde(default)]
    pub aggressive: bool,

    /// Per-stage overrides in milliseconds.
    #[serde(default)]
    pub overrides: StageOverrides,
}

/// Optional per-stage deadline overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageOverrides {
    #[serde(default)]
    pub preprocess_ms: Option<u64>,
    #[serde(default)]
    pub nlu_ms: Option<u64>,
    #[serde(default)]
    pub retrieval_ms: Option<u64>,
    #[serde(default)]
    pub rerank_ms: Option<u64>,
    #[serde(default)]
    pub generation_ms: Option<u64>,
    #[serde(default)]
    pub postprocess_ms: Option<u64>,
    #[serde(default)]
    pub total_ms: Option<u64>,
}

impl StageOverrides {
    pub fn get(&self, stage: Stage) -> Option<u64> {
        match stage {
            Stage::Preprocess => self.preprocess_ms,
            Stage::Nlu => self.nlu_ms,
            Stage::Retrieval => self.retrieval_ms,
            Stage::Rerank => self.rerank_ms,
            Stage::Generation => self.generation_ms,
            Stage::Postprocess => self.postprocess_ms,
        }
    }
}

impl TimeoutConfig {
    pub(super) fn validate(&self, issues: &mut Vec<ConfigError>) {
        let named = [
            ("timeouts.overrides.preprocess_ms", self.overrides.preprocess_ms),
            ("timeouts.overrides.nlu_ms", self.overrides.nlu_ms),
            ("timeouts.overrides.retrieval_ms", self.overrides.retrieval_ms),
            ("timeouts.overrides.rerank_ms", self.overrides.rerank_ms),
            ("timeouts.overrides.generation_ms", self.overrides.generation_ms),
            ("timeouts.overrides.postprocess_ms", self.overrides.postprocess_ms),
            ("timeouts.overrides.total_ms", self.overrides.total_ms),
        ];
        for (field, value) in named {
            if value == Some(0) {
                issues.push(ConfigError::error(field, "must be greater than zero"));
            }
        }
    }
}
