//! Static clarifying-question templates and the label maps that fill them.
//!
//! Questions are Spanish, matching the pipeline's user-visible fallback
//! messages. Template choice is pseudorandom but seedable so tests pin the
//! exact wording.

use serde::Serialize;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Why a clarifying question is being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationKind {
    IntentAmbiguous,
    EntityAmbiguous,
    EntityMissing,
    ContextUnclear,
}

impl ClarificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClarificationKind::IntentAmbiguous => "intent_ambiguous",
            ClarificationKind::EntityAmbiguous => "entity_ambiguous",
            ClarificationKind::EntityMissing => "entity_missing",
            ClarificationKind::ContextUnclear => "context_unclear",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Label maps
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Intent tag → human-readable Spanish label.
const INTENT_LABELS: &[(&str, &str)] = &[
    ("research", "investigar información"),
    ("document_analysis", "analizar un documento"),
    ("data_analysis", "analizar datos"),
    ("multi_step_task", "realizar una tarea de varios pasos"),
    ("code", "ayudarte con código"),
    ("chat", "conversar"),
];

/// Slot name → human-readable Spanish label.
const SLOT_LABELS: &[(&str, &str)] = &[
    ("topic", "el tema"),
    ("document", "el documento"),
    ("date", "la fecha"),
    ("format", "el formato"),
    ("language", "el idioma"),
    ("source", "la fuente"),
    ("deadline", "el plazo"),
];

/// Human label for an intent tag; unknown tags pass through unchanged.
pub fn intent_label(intent: &str) -> &str {
    INTENT_LABELS
        .iter()
        .find(|(tag, _)| *tag == intent)
        .map(|(_, label)| *label)
        .unwrap_or(intent)
}

/// Human label for a slot name; unknown slots pass through unchanged.
pub fn slot_label(slot: &str) -> &str {
    SLOT_LABELS
        .iter()
        .find(|(name, _)| *name == slot)
        .map(|(_, label)| *label)
        .unwrap_or(slot)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Templates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const INTENT_AMBIGUOUS: &[&str] = &[
    "¿Quieres {a} o prefieres {b}?",
    "No me queda claro si quieres {a} o {b}. ¿Cuál de las dos?",
    "Puedo {a} o {b}. ¿Por dónde empezamos?",
];

const ENTITY_AMBIGUOUS: &[&str] = &[
    "Cuando dices «{term}», ¿a qué te refieres exactamente?",
    "«{term}» puede entenderse de varias formas. ¿Puedes concretar?",
    "¿Qué significa «{term}» en este contexto?",
];

const ENTITY_MISSING: &[&str] = &[
    "Para ayudarte necesito saber {slot}. ¿Me lo indicas?",
    "Me falta {slot} para continuar. ¿Cuál es?",
    "¿Puedes decirme {slot}?",
];

const CONTEXT_UNCLEAR: &[&str] = &[
    "No estoy seguro de haber entendido. ¿Puedes darme más detalles?",
    "¿Puedes reformular tu pregunta con un poco más de contexto?",
    "Creo que me falta contexto. ¿Qué necesitas exactamente?",
];

pub(crate) fn templates_for(kind: ClarificationKind) -> &'static [&'static str] {
    match kind {
        ClarificationKind::IntentAmbiguous => INTENT_AMBIGUOUS,
        ClarificationKind::EntityAmbiguous => ENTITY_AMBIGUOUS,
        ClarificationKind::EntityMissing => ENTITY_MISSING,
        ClarificationKind::ContextUnclear => CONTEXT_UNCLEAR,
    }
}

/// Fill a template's placeholders.
pub(crate) fn fill(
    template: &str,
    a: Option<&str>,
    b: Option<&str>,
    slot: Option<&str>,
    term: Option<&str>,
) -> String {
    let mut out = template.to_string();
    if let Some(a) = a {
        out = out.replace("{a}", a);
    }
    if let Some(b) = b {
        out = out.replace("{b}", b);
    }
    if let Some(slot) = slot {
        out = out.replace("{slot}", slot);
    }
    if let Some(term) = term {
        out = out.replace("{term}", term);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_labels_resolve() {
        assert_eq!(intent_label("research"), "investigar información");
        assert_eq!(slot_label("topic"), "el tema");
    }

    #[test]
    fn unknown_labels_pass_through() {
        assert_eq!(intent_label("alchemy"), "alchemy");
        assert_eq!(slot_label("cauldron"), "cauldron");
    }

    #[test]
    fn every_kind_has_templates() {
        for kind in [
            ClarificationKind::IntentAmbiguous,
            ClarificationKind::EntityAmbiguous,
            ClarificationKind::EntityMissing,
            ClarificationKind::ContextUnclear,
        ] {
            assert!(!templates_for(kind).is_empty());
        }
    }

    #[test]
    fn fill_replaces_placeholders() {
        let question = fill(
            "¿Quieres {a} o prefieres {b}?",
            Some("investigar información"),
            Some("analizar un documento"),
            None,
            None,
        );
        assert_eq!(
            question,
            "¿Quieres investigar información o prefieres analizar un documento?"
        );
    }
}
