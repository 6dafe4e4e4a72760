use serde::{Deserialize, Serialize};

/// A pipeline stage. Every stage runs at most once per turn, in the order
/// listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preprocess,
    Nlu,
    Retrieval,
    Rerank,
    Generation,
    Postprocess,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Preprocess,
        Stage::Nlu,
        Stage::Retrieval,
        Stage::Rerank,
        Stage::Generation,
        Stage::Postprocess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Preprocess => "preprocess",
            Stage::Nlu => "nlu",
            Stage::Retrieval => "retrieval",
            Stage::Rerank => "rerank",
            Stage::Generation => "generation",
            Stage::Postprocess => "postprocess",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage latency breakdown for one turn.
///
/// `None` means the stage was never reached; a value is the measured wall
/// time in milliseconds. `total` is always measured from request start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineLatency {
    pub preprocess: Option<u64>,
    pub nlu: Option<u64>,
    pub retrieval: Option<u64>,
    pub rerank: Option<u64>,
    pub generation: Option<u64>,
    pub postprocess: Option<u64>,
    pub total: u64,
}

impl PipelineLatency {
    /// A latency record where no stage was reached.
    pub fn unreached(total: u64) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn get(&self, stage: Stage) -> Option<u64> {
        match stage {
            Stage::Preprocess => self.preprocess,
            Stage::Nlu => self.nlu,
            Stage::Retrieval => self.retrieval,
            Stage::Rerank => self.rerank,
            Stage::Generation => self.generation,
            Stage::Postprocess => self.postprocess,
        }
    }

    pub fn set(&mut self, stage: Stage, duration_ms: u64) {
        let slot = match stage {
            Stage::Preprocess => &mut self.preprocess,
            Stage::Nlu => &mut self.nlu,
            Stage::Retrieval => &mut self.retrieval,
            Stage::Rerank => &mut self.rerank,
            Stage::Generation => &mut self.generation,
            Stage::Postprocess => &mut self.postprocess,
        };
        *slot = Some(duration_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_roundtrips_through_serde() {
        for stage in Stage::ALL {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{stage}\""));
            let back: Stage = serde_json::from_str(&json).unwrap();
            assert_eq!(back, stage);
        }
    }

    #[test]
    fn unreached_stages_serialize_as_null() {
        let mut latency = PipelineLatency::unreached(120);
        latency.set(Stage::Preprocess, 3);

        let json = serde_json::to_value(&latency).unwrap();
        assert_eq!(json["preprocess"], 3);
        assert!(json["retrieval"].is_null());
        assert_eq!(json["total"], 120);
    }

    #[test]
    fn get_set_cover_every_stage() {
        let mut latency = PipelineLatency::default();
        for (i, stage) in Stage::ALL.into_iter().enumerate() {
            assert_eq!(latency.get(stage), None);
            latency.set(stage, i as u64);
            assert_eq!(latency.get(stage), Some(i as u64));
        }
    }
}
