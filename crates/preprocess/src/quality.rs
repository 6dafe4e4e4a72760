//! Quality gates: flags, garbage detection, and the quality score.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Messages shorter than this flag `too_short`.
const MIN_CHARS: usize = 2;

/// Messages longer than this flag `too_long`.
const MAX_CHARS: usize = 10_000;

/// Unique-character ratio above this (for messages over 20 chars) flags
/// `high_entropy`.
const ENTROPY_RATIO: f64 = 0.9;
const ENTROPY_MIN_CHARS: usize = 20;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(https?://\S+|www\.\S+)").expect("url regex")
});

static CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)(```|`[^`\n]+`|\b(?:fn|def|function|class|const|let|var|import|return)\b\s*[\w({:]|#include\s*<)",
    )
    .expect("code regex")
});

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Flags
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the quality gates can say about a message. `Ok` is present
/// exactly when no other flag fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    Ok,
    TooShort,
    TooLong,
    GarbageInput,
    OnlySymbols,
    HighEntropy,
    RepeatedChars,
    SpamLike,
    ContainsCode,
    ContainsUrl,
}

impl QualityFlag {
    /// Score penalty for this flag. Subtracted from 1.0; the result is
    /// clamped to `[0, 1]`.
    pub fn penalty(&self) -> f32 {
        match self {
            QualityFlag::Ok => 0.0,
            QualityFlag::TooShort => 0.2,
            QualityFlag::TooLong => 0.1,
            QualityFlag::GarbageInput => 0.8,
            QualityFlag::OnlySymbols => 0.7,
            QualityFlag::HighEntropy => 0.4,
            QualityFlag::RepeatedChars => 0.15,
            QualityFlag::SpamLike => 0.5,
            QualityFlag::ContainsCode => 0.0,
            QualityFlag::ContainsUrl => 0.05,
        }
    }
}

/// Compute the quality score for a flag set.
pub fn quality_score(flags: &[QualityFlag]) -> f32 {
    let score = flags.iter().fold(1.0f32, |acc, f| acc - f.penalty());
    score.clamp(0.0, 1.0)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run every gate over the normalized text. `repeated` comes from the
/// normalizer, which already collapsed the runs it flags.
pub fn assess(normalized: &str, repeated: bool) -> Vec<QualityFlag> {
    let mut flags = Vec::new();

    if repeated {
        flags.push(QualityFlag::RepeatedChars);
    }

    let char_count = normalized.chars().count();
    if char_count < MIN_CHARS {
        flags.push(QualityFlag::TooShort);
    } else if char_count > MAX_CHARS {
        flags.push(QualityFlag::TooLong);
    }

    let contains_url = URL_RE.is_match(normalized);
    if contains_url {
        flags.push(QualityFlag::ContainsUrl);
    }
    if CODE_RE.is_match(normalized) {
        flags.push(QualityFlag::ContainsCode);
    }

    let only_symbols = is_only_symbols(normalized);
    if only_symbols {
        flags.push(QualityFlag::OnlySymbols);
    }

    let high_entropy = is_high_entropy(normalized, char_count);
    if high_entropy {
        flags.push(QualityFlag::HighEntropy);
    }

    if is_spam_like(normalized, char_count, contains_url, repeated) {
        flags.push(QualityFlag::SpamLike);
    }

    let alnum_ratio = alphanumeric_ratio(normalized, char_count);
    if only_symbols
        || (high_entropy && char_count > 50)
        || (alnum_ratio < 0.3 && char_count > 10)
    {
        flags.push(QualityFlag::GarbageInput);
    }

    if flags.is_empty() {
        flags.push(QualityFlag::Ok);
    }
    flags
}

/// The message carries no letters or digits at all, only symbols.
fn is_only_symbols(text: &str) -> bool {
    let mut has_symbol = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            return false;
        }
        if !c.is_whitespace() {
            has_symbol = true;
        }
    }
    has_symbol
}

fn is_high_entropy(text: &str, char_count: usize) -> bool {
    if char_count <= ENTROPY_MIN_CHARS {
        return false;
    }
    let unique: std::collections::HashSet<char> = text.chars().collect();
    (unique.len() as f64 / char_count as f64) > ENTROPY_RATIO
}

fn alphanumeric_ratio(text: &str, char_count: usize) -> f64 {
    if char_count == 0 {
        return 1.0;
    }
    let alnum = text.chars().filter(|c| c.is_alphanumeric()).count();
    alnum as f64 / char_count as f64
}

/// Spam cues: link farms or shouting. Kept deliberately conservative —
/// false positives cost half the quality score.
fn is_spam_like(text: &str, char_count: usize, contains_url: bool, repeated: bool) -> bool {
    if contains_url && URL_RE.find_iter(text).count() >= 3 {
        return true;
    }
    if contains_url && repeated {
        return true;
    }
    if char_count > 20 {
        let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
        if letters.len() > 10 {
            let upper = letters.iter().filter(|c| c.is_uppercase()).count();
            return upper as f64 / letters.len() as f64 > 0.8;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_message_is_ok() {
        let flags = assess("¿Cuál es la capital de Francia?", false);
        assert_eq!(flags, vec![QualityFlag::Ok]);
        assert_eq!(quality_score(&flags), 1.0);
    }

    #[test]
    fn short_message_flags_too_short() {
        let flags = assess("a", false);
        assert!(flags.contains(&QualityFlag::TooShort));
        assert!(!flags.contains(&QualityFlag::Ok));
    }

    #[test]
    fn long_message_flags_too_long() {
        let text = "palabra ".repeat(2_000);
        let flags = assess(&text, false);
        assert!(flags.contains(&QualityFlag::TooLong));
    }

    #[test]
    fn url_and_code_detection() {
        let flags = assess("mira https://example.com/a", false);
        assert!(flags.contains(&QualityFlag::ContainsUrl));

        let flags = assess("usa ```rust\nfn main() {}\n```", false);
        assert!(flags.contains(&QualityFlag::ContainsCode));

        let flags = assess("la variable `x` no existe", false);
        assert!(flags.contains(&QualityFlag::ContainsCode));
    }

    #[test]
    fn only_symbols_is_garbage() {
        let flags = assess("@@", true);
        assert!(flags.contains(&QualityFlag::OnlySymbols));
        assert!(flags.contains(&QualityFlag::GarbageInput));
    }

    #[test]
    fn high_entropy_long_string_is_garbage() {
        // 62 distinct characters, no repeats: entropy ratio 1.0.
        let text: String = ('0'..='9')
            .chain('a'..='z')
            .chain('A'..='Z')
            .collect();
        assert_eq!(text.chars().count(), 62);
        let flags = assess(&text, false);
        assert!(flags.contains(&QualityFlag::HighEntropy));
        assert!(flags.contains(&QualityFlag::GarbageInput));
    }

    #[test]
    fn entropy_needs_more_than_twenty_chars() {
        let flags = assess("abcdefghij", false);
        assert!(!flags.contains(&QualityFlag::HighEntropy));
    }

    #[test]
    fn score_never_increases_when_flags_accumulate() {
        let base = vec![QualityFlag::ContainsUrl];
        let more = vec![QualityFlag::ContainsUrl, QualityFlag::RepeatedChars];
        assert!(quality_score(&more) <= quality_score(&base));

        let worst = vec![
            QualityFlag::GarbageInput,
            QualityFlag::OnlySymbols,
            QualityFlag::HighEntropy,
        ];
        assert_eq!(quality_score(&worst), 0.0);
    }

    #[test]
    fn link_farm_is_spam() {
        let text = "https://a.com https://b.com https://c.com";
        let flags = assess(text, false);
        assert!(flags.contains(&QualityFlag::SpamLike));
    }

    #[test]
    fn code_carries_no_penalty() {
        assert_eq!(quality_score(&[QualityFlag::ContainsCode]), 1.0);
    }
}
