//! Regex-bank language detection for Spanish and English.
//!
//! Only `es` and `en` are first-class; everything else resolves to `auto`
//! (tie) or `unknown` (no evidence). Detection runs over the normalized
//! text with URLs and e-mail addresses stripped so link-heavy messages
//! don't skew the counts.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Detected message language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectedLanguage {
    Es,
    En,
    Auto,
    Unknown,
}

/// Detection confidence is capped here; word banks are evidence, not proof.
const MAX_CONFIDENCE: f32 = 0.95;

/// Flat score bonus when accented Spanish characters are present.
const ACCENT_BIAS: usize = 2;

static STRIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(https?://\S+|www\.\S+|\b[\w.+-]+@[\w-]+\.[\w.]+\b)").expect("strip regex")
});

static ES_BANK: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(el|la|los|las|un|una|unos|unas)\b",
        r"(?i)\b(de|del|en|con|por|para|sobre|entre|sin)\b",
        r"(?i)\b(que|qué|cómo|cuál|cuáles|dónde|cuándo|quién|cuánto)\b",
        r"(?i)\b(es|está|están|soy|eres|somos|ser|estar|hay)\b",
        r"(?i)\b(hola|gracias|por favor|buenos días|buenas tardes|buenas noches)\b",
        r"(?i)\b(quiero|necesito|puedes|puedo|ayuda|ayúdame|dime|hazme|busca)\b",
        r"(?i)\b(pero|también|muy|más|menos|ahora|luego|siempre|nunca)\b",
        r"(?i)\b(y|o|si|no|sí|porque|cuando|mientras|aunque)\b",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("es bank"))
    .collect()
});

static EN_BANK: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(the|a|an|this|that|these|those)\b",
        r"(?i)\b(of|in|on|with|for|about|between|without|from|to)\b",
        r"(?i)\b(what|how|which|where|when|who|why|whose)\b",
        r"(?i)\b(is|are|was|were|be|been|being|am)\b",
        r"(?i)\b(hello|hi|thanks|thank you|please|good morning|good evening)\b",
        r"(?i)\b(want|need|can|could|should|would|help|tell|make|find)\b",
        r"(?i)\b(but|also|very|more|less|now|then|always|never)\b",
        r"(?i)\b(and|or|if|not|yes|because|while|although)\b",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("en bank"))
    .collect()
});

static ES_ACCENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[áéíóúüñÁÉÍÓÚÜÑ¿¡]").expect("accent regex"));

/// Score the text against both banks and pick a winner.
pub fn detect(normalized: &str) -> (DetectedLanguage, f32) {
    let text = STRIP_RE.replace_all(normalized, " ");

    let mut es = bank_matches(&ES_BANK, &text);
    let en = bank_matches(&EN_BANK, &text);

    if ES_ACCENTS.is_match(&text) {
        es += ACCENT_BIAS;
    }

    let total = es + en;
    if total == 0 {
        return (DetectedLanguage::Unknown, 0.5);
    }
    if es == en {
        return (DetectedLanguage::Auto, 0.5);
    }

    let (language, winner) = if es > en {
        (DetectedLanguage::Es, es)
    } else {
        (DetectedLanguage::En, en)
    };
    let confidence = 0.5 + winner as f32 / (2.0 * total as f32);
    (language, confidence.min(MAX_CONFIDENCE))
}

fn bank_matches(bank: &[Regex], text: &str) -> usize {
    bank.iter().map(|re| re.find_iter(text).count()).sum()
}
