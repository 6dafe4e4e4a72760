//! Confidence→clarification decision policy.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use charla_domain::IntentScore;

use crate::templates::{fill, intent_label, slot_label, templates_for, ClarificationKind};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Thresholds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const CONFIDENCE_HIGH: f32 = 0.85;
pub const CONFIDENCE_OK: f32 = 0.70;
pub const CONFIDENCE_CLARIFY: f32 = 0.40;
pub const CONFIDENCE_REJECT: f32 = 0.20;

/// Two intents closer than this are ambiguous.
const INTENT_GAP: f32 = 0.15;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input / output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the policy looks at for one decision.
#[derive(Debug, Clone, Default)]
pub struct ClarifyInput {
    pub message: String,
    /// Intent candidates, any order; the policy ranks them.
    pub intents: Vec<IntentScore>,
    pub missing_slots: Vec<String>,
    pub ambiguous_terms: Vec<String>,
    /// Trailing rendered conversation lines, oldest first.
    pub history: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarifyPriority {
    Normal,
    High,
}

/// A clarification the orchestrator should ask.
#[derive(Debug, Clone, Serialize)]
pub struct Clarification {
    pub kind: ClarificationKind,
    pub question: String,
    pub priority: ClarifyPriority,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decides whether to clarify and phrases the question from the template
/// bank. One instance serves the whole process.
pub struct ClarificationPolicy {
    enabled: bool,
    max_attempts: u32,
    rng: Mutex<StdRng>,
}

impl ClarificationPolicy {
    pub fn new(enabled: bool, max_attempts: u32) -> Self {
        Self {
            enabled,
            max_attempts,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic template choice for tests.
    pub fn with_seed(enabled: bool, max_attempts: u32, seed: u64) -> Self {
        Self {
            enabled,
            max_attempts,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Decide whether this turn needs a clarifying question.
    ///
    /// `attempts` is the session's running clarification count; once the cap
    /// is reached the policy refuses and the caller must fall back.
    pub fn decide(&self, input: &ClarifyInput, attempts: u32) -> Option<Clarification> {
        if !self.enabled || attempts >= self.max_attempts {
            return None;
        }

        let mut ranked = input.intents.clone();
        ranked.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let Some(top) = ranked.first() else {
            return Some(self.phrase(ClarificationKind::ContextUnclear, input, &ranked, ClarifyPriority::Normal));
        };

        let c = top.confidence;
        if c >= CONFIDENCE_HIGH {
            return None;
        }

        if c >= CONFIDENCE_OK {
            if input.missing_slots.is_empty() {
                return None;
            }
            return Some(self.phrase(
                ClarificationKind::EntityMissing,
                input,
                &ranked,
                ClarifyPriority::Normal,
            ));
        }

        if c >= CONFIDENCE_CLARIFY {
            let kind = match ranked.get(1) {
                Some(runner_up) if c - runner_up.confidence < INTENT_GAP => {
                    ClarificationKind::IntentAmbiguous
                }
                _ if !input.ambiguous_terms.is_empty() => ClarificationKind::EntityAmbiguous,
                _ if !input.missing_slots.is_empty() => ClarificationKind::EntityMissing,
                _ => ClarificationKind::ContextUnclear,
            };
            return Some(self.phrase(kind, input, &ranked, ClarifyPriority::Normal));
        }

        // Confidence below the clarify floor: still ask, but flag the
        // question as high priority so the caller surfaces it prominently.
        Some(self.phrase(
            ClarificationKind::ContextUnclear,
            input,
            &ranked,
            ClarifyPriority::High,
        ))
    }

    /// Pick a template for the kind and fill its placeholders.
    fn phrase(
        &self,
        kind: ClarificationKind,
        input: &ClarifyInput,
        ranked: &[IntentScore],
        priority: ClarifyPriority,
    ) -> Clarification {
        let templates = templates_for(kind);
        let index = self.rng.lock().gen_range(0..templates.len());
        let template = templates[index];

        let a = ranked.first().map(|i| intent_label(&i.intent));
        let b = ranked.get(1).map(|i| intent_label(&i.intent));
        let slot = input.missing_slots.first().map(|s| slot_label(s));
        let term = input.ambiguous_terms.first().map(String::as_str);

        Clarification {
            kind,
            question: fill(template, a, b, slot, term),
            priority,
        }
    }
}
