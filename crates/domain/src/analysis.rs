//! The analysis result consumed from the external NLU.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Estimated difficulty of answering the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    Expert,
}

/// One scored intent candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentScore {
    pub intent: String,
    pub confidence: f32,
}

/// What the prompt analyzer extracted from one user message.
///
/// `secondary_intents`, `missing_slots` and `ambiguous_terms` are optional
/// parts of the contract; analyzers that don't produce them leave the lists
/// empty and the clarification policy degrades accordingly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub intent: String,
    pub intent_confidence: f32,
    #[serde(default)]
    pub secondary_intents: Vec<IntentScore>,
    #[serde(default)]
    pub extracted_entities: HashMap<String, serde_json::Value>,
    pub complexity: Complexity,
    pub raw_message: String,
    #[serde(default)]
    pub missing_slots: Vec<String>,
    #[serde(default)]
    pub ambiguous_terms: Vec<String>,
}

impl AnalysisResult {
    /// All intent candidates, best first.
    pub fn ranked_intents(&self) -> Vec<IntentScore> {
        let mut intents = Vec::with_capacity(1 + self.secondary_intents.len());
        intents.push(IntentScore {
            intent: self.intent.clone(),
            confidence: self.intent_confidence,
        });
        intents.extend(self.secondary_intents.iter().cloned());
        intents.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        intents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranked_intents_orders_by_confidence() {
        let analysis = AnalysisResult {
            intent: "research".into(),
            intent_confidence: 0.55,
            secondary_intents: vec![
                IntentScore {
                    intent: "chat".into(),
                    confidence: 0.60,
                },
                IntentScore {
                    intent: "document_analysis".into(),
                    confidence: 0.50,
                },
            ],
            extracted_entities: HashMap::new(),
            complexity: Complexity::Moderate,
            raw_message: "hola".into(),
            missing_slots: vec![],
            ambiguous_terms: vec![],
        };

        let ranked = analysis.ranked_intents();
        assert_eq!(ranked[0].intent, "chat");
        assert_eq!(ranked[1].intent, "research");
        assert_eq!(ranked[2].intent, "document_analysis");
    }

    #[test]
    fn optional_lists_default_to_empty() {
        let json = r#"{
            "intent": "chat",
            "intent_confidence": 0.9,
            "complexity": "simple",
            "raw_message": "hola"
        }"#;
        let analysis: AnalysisResult = serde_json::from_str(json).unwrap();
        assert!(analysis.secondary_intents.is_empty());
        assert!(analysis.missing_slots.is_empty());
        assert!(analysis.ambiguous_terms.is_empty());
        assert!(analysis.extracted_entities.is_empty());
    }
}
