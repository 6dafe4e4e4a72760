//! Keyword-bank prompt analyzer.
//!
//! A deterministic, dependency-free stand-in for the external NLU so the
//! pipeline runs end-to-end out of the box. Each intent tag owns a regex
//! bank; match counts become confidence. Deployments with a real analyzer
//! swap it in behind the [`PromptAnalyzer`] trait.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use charla_domain::{AnalysisResult, Complexity, IntentScore, Result};

use crate::traits::{AnalyzeContext, PromptAnalyzer};

/// Confidence floor for the default `chat` intent when nothing matches.
const CHAT_BASELINE: f32 = 0.75;

/// Intents with their evidence banks, strongest cues first.
static INTENT_BANKS: LazyLock<Vec<(&'static str, Vec<Regex>)>> = LazyLock::new(|| {
    let bank = |patterns: &[&str]| -> Vec<Regex> {
        patterns
            .iter()
            .map(|p| Regex::new(p).expect("intent bank"))
            .collect()
    };
    vec![
        (
            "research",
            bank(&[
                r"(?i)\b(investiga|investigar|averigua|busca información|research)\b",
                r"(?i)\b(fuentes|referencias|papers|estudios|bibliografía)\b",
                r"(?i)\b(estado del arte|find out about)\b",
            ]),
        ),
        (
            "document_analysis",
            bank(&[
                r"(?i)\b(documento|pdf|informe|contrato|acta)\b",
                r"(?i)\b(resume|resumir|analiza) (este|el|la|mi)\b",
                r"(?i)\b(document analysis|summarize this)\b",
            ]),
        ),
        (
            "data_analysis",
            bank(&[
                r"(?i)\b(datos|dataset|csv|estadísticas|métricas)\b",
                r"(?i)\b(gráfica|gráfico|tendencia|promedio|correlación)\b",
                r"(?i)\b(data analysis|analyze the data)\b",
            ]),
        ),
        (
            "multi_step_task",
            bank(&[
                r"(?i)\b(paso a paso|varios pasos|plan de trabajo)\b",
                r"(?i)\bprimero\b.*\b(luego|después|finalmente)\b",
                r"(?i)\b(step by step|workflow)\b",
            ]),
        ),
        (
            "code",
            bank(&[
                r"(?i)\b(código|script|función|programa|compilar)\b",
                r"(?i)\b(bug|error en mi|stack trace|excepción)\b",
                r"```",
            ]),
        ),
    ]
});

/// Built-in analyzer over the intent banks.
#[derive(Default)]
pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn score_intents(message: &str) -> Vec<IntentScore> {
        let mut scored: Vec<IntentScore> = INTENT_BANKS
            .iter()
            .filter_map(|(intent, bank)| {
                let matches: usize = bank.iter().map(|re| re.find_iter(message).count()).sum();
                (matches > 0).then(|| IntentScore {
                    intent: (*intent).to_string(),
                    confidence: (0.55 + 0.12 * matches as f32).min(0.95),
                })
            })
            .collect();
        scored.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored
    }

    fn estimate_complexity(message: &str, intent_count: usize) -> Complexity {
        let chars = message.chars().count();
        let multi_step = message.to_lowercase().contains("paso a paso")
            || (message.contains("primero") && message.contains("luego"));
        if chars > 600 || (multi_step && chars > 200) {
            Complexity::Expert
        } else if chars > 300 || intent_count >= 2 {
            Complexity::Complex
        } else if chars > 120 || multi_step {
            Complexity::Moderate
        } else {
            Complexity::Simple
        }
    }

    fn extract_entities(message: &str) -> HashMap<String, serde_json::Value> {
        static QUOTED: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r#""([^"]{1,120})"|«([^»]{1,120})»"#).expect("quoted"));
        static URL: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"(?i)https?://\S+").expect("url"));

        let mut entities = HashMap::new();
        let quoted: Vec<String> = QUOTED
            .captures_iter(message)
            .filter_map(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().to_string())
            .collect();
        if !quoted.is_empty() {
            entities.insert("quoted".into(), serde_json::json!(quoted));
        }
        let urls: Vec<String> = URL
            .find_iter(message)
            .map(|m| m.as_str().to_string())
            .collect();
        if !urls.is_empty() {
            entities.insert("urls".into(), serde_json::json!(urls));
        }
        entities
    }
}

#[async_trait::async_trait]
impl PromptAnalyzer for HeuristicAnalyzer {
    async fn analyze(&self, message: &str, _ctx: &AnalyzeContext) -> Result<AnalysisResult> {
        let mut scored = Self::score_intents(message);
        let (top, secondary) = if scored.is_empty() {
            (
                IntentScore {
                    intent: "chat".into(),
                    confidence: CHAT_BASELINE,
                },
                Vec::new(),
            )
        } else {
            let top = scored.remove(0);
            (top, scored)
        };

        let complexity = Self::estimate_complexity(message, 1 + secondary.len());

        Ok(AnalysisResult {
            intent: top.intent,
            intent_confidence: top.confidence,
            secondary_intents: secondary,
            extracted_entities: Self::extract_entities(message),
            complexity,
            raw_message: message.to_string(),
            missing_slots: Vec::new(),
            ambiguous_terms: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn analyze(message: &str) -> AnalysisResult {
        HeuristicAnalyzer::new()
            .analyze(message, &AnalyzeContext::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn plain_question_is_chat() {
        let analysis = analyze("¿Cuál es la capital de Francia?").await;
        assert_eq!(analysis.intent, "chat");
        assert!(analysis.intent_confidence >= 0.70);
        assert_eq!(analysis.complexity, Complexity::Simple);
    }

    #[tokio::test]
    async fn research_keywords_win() {
        let analysis = analyze("Investiga las fuentes sobre el cambio climático").await;
        assert_eq!(analysis.intent, "research");
        assert!(analysis.intent_confidence > 0.55);
    }

    #[tokio::test]
    async fn multiple_banks_produce_secondary_intents() {
        let analysis =
            analyze("Investiga este documento pdf y resume el informe con referencias").await;
        assert!(!analysis.secondary_intents.is_empty());
    }

    #[tokio::test]
    async fn long_multi_step_prompts_are_expert() {
        let message = format!(
            "Primero {} y luego haz un plan paso a paso. {}",
            "recopila todos los datos del último trimestre",
            "x".repeat(600)
        );
        let analysis = analyze(&message).await;
        assert_eq!(analysis.complexity, Complexity::Expert);
    }

    #[tokio::test]
    async fn quoted_phrases_become_entities() {
        let analysis = analyze(r#"Busca el libro "Cien años de soledad""#).await;
        let quoted = analysis.extracted_entities.get("quoted").unwrap();
        assert_eq!(quoted[0], "Cien años de soledad");
    }
}
