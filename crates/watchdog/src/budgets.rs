use charla_domain::config::TimeoutConfig;
use charla_domain::Stage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Presets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-stage and total deadlines, in milliseconds.
///
/// The sum of the stage budgets intentionally exceeds `total_ms`: the total
/// is authoritative, and each stage is clamped to whatever remains of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageBudgets {
    pub preprocess_ms: u64,
    pub nlu_ms: u64,
    pub retrieval_ms: u64,
    pub rerank_ms: u64,
    pub generation_ms: u64,
    pub postprocess_ms: u64,
    pub total_ms: u64,
}

impl Default for StageBudgets {
    fn default() -> Self {
        Self {
            preprocess_ms: 500,
            nlu_ms: 1_000,
            retrieval_ms: 3_000,
            rerank_ms: 1_500,
            generation_ms: 8_000,
            postprocess_ms: 500,
            total_ms: 15_000,
        }
    }
}

impl StageBudgets {
    /// Tighter deadlines for latency-sensitive deployments.
    pub fn aggressive() -> Self {
        Self {
            preprocess_ms: 200,
            nlu_ms: 500,
            retrieval_ms: 2_000,
            rerank_ms: 1_000,
            generation_ms: 5_000,
            postprocess_ms: 300,
            total_ms: 10_000,
        }
    }

    /// Resolve the configured preset plus per-stage overrides.
    pub fn from_config(config: &TimeoutConfig) -> Self {
        let mut budgets = if config.aggressive {
            Self::aggressive()
        } else {
            Self::default()
        };
        for stage in Stage::ALL {
            if let Some(ms) = config.overrides.get(stage) {
                budgets.set(stage, ms);
            }
        }
        if let Some(ms) = config.overrides.total_ms {
            budgets.total_ms = ms;
        }
        budgets
    }

    pub fn get(&self, stage: Stage) -> u64 {
        match stage {
            Stage::Preprocess => self.preprocess_ms,
            Stage::Nlu => self.nlu_ms,
            Stage::Retrieval => self.retrieval_ms,
            Stage::Rerank => self.rerank_ms,
            Stage::Generation => self.generation_ms,
            Stage::Postprocess => self.postprocess_ms,
        }
    }

    pub fn set(&mut self, stage: Stage, ms: u64) {
        match stage {
            Stage::Preprocess => self.preprocess_ms = ms,
            Stage::Nlu => self.nlu_ms = ms,
            Stage::Retrieval => self.retrieval_ms = ms,
            Stage::Rerank => self.rerank_ms = ms,
            Stage::Generation => self.generation_ms = ms,
            Stage::Postprocess => self.postprocess_ms = ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charla_domain::config::{StageOverrides, TimeoutConfig};

    #[test]
    fn default_preset_numbers() {
        let budgets = StageBudgets::default();
        assert_eq!(budgets.preprocess_ms, 500);
        assert_eq!(budgets.generation_ms, 8_000);
        assert_eq!(budgets.total_ms, 15_000);
    }

    #[test]
    fn aggressive_preset_numbers() {
        let budgets = StageBudgets::aggressive();
        assert_eq!(budgets.preprocess_ms, 200);
        assert_eq!(budgets.nlu_ms, 500);
        assert_eq!(budgets.generation_ms, 5_000);
        assert_eq!(budgets.total_ms, 10_000);
    }

    #[test]
    fn overrides_pin_individual_stages() {
        let config = TimeoutConfig {
            aggressive: true,
            overrides: StageOverrides {
                generation_ms: Some(7_000),
                total_ms: Some(12_000),
                ..Default::default()
            },
        };
        let budgets = StageBudgets::from_config(&config);
        assert_eq!(budgets.generation_ms, 7_000);
        assert_eq!(budgets.total_ms, 12_000);
        // Untouched stages keep the aggressive preset.
        assert_eq!(budgets.nlu_ms, 500);
    }
}
