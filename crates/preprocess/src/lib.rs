//! Deterministic text preprocessing — normalization, quality gating, and
//! language detection. No I/O, no failures: malformed input surfaces as
//! quality flags, never as errors.

mod language;
mod normalize;
mod quality;

use std::time::Instant;

use serde::{Deserialize, Serialize};

pub use language::{detect, DetectedLanguage};
pub use normalize::normalize;
pub use quality::{assess, quality_score, QualityFlag};

/// Everything the preprocessor says about one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessResult {
    pub normalized_text: String,
    pub original_text: String,
    pub language: DetectedLanguage,
    pub language_confidence: f32,
    pub quality_flags: Vec<QualityFlag>,
    pub quality_score: f32,
    pub word_count: usize,
    pub char_count: usize,
    pub contains_code: bool,
    pub contains_url: bool,
    pub preprocessing_time_ms: u64,
}

impl PreprocessResult {
    /// Neutral result used when the preprocess stage itself is skipped or
    /// times out: the original text passes through untouched.
    pub fn neutral(original: &str) -> Self {
        Self {
            normalized_text: original.to_string(),
            original_text: original.to_string(),
            language: DetectedLanguage::Auto,
            language_confidence: 0.5,
            quality_flags: vec![QualityFlag::Ok],
            quality_score: 1.0,
            word_count: original.split_whitespace().count(),
            char_count: original.chars().count(),
            contains_code: false,
            contains_url: false,
            preprocessing_time_ms: 0,
        }
    }

    pub fn is_garbage(&self) -> bool {
        self.quality_flags.contains(&QualityFlag::GarbageInput)
    }
}

/// Run the full preprocessing pipeline over one raw message.
pub fn preprocess(input: &str) -> PreprocessResult {
    let started = Instant::now();

    let (normalized_text, repeated) = normalize(input);
    let quality_flags = assess(&normalized_text, repeated);
    let score = quality_score(&quality_flags);
    let (language, language_confidence) = detect(&normalized_text);

    PreprocessResult {
        word_count: normalized_text.split_whitespace().count(),
        char_count: normalized_text.chars().count(),
        contains_code: quality_flags.contains(&QualityFlag::ContainsCode),
        contains_url: quality_flags.contains(&QualityFlag::ContainsUrl),
        quality_score: score,
        quality_flags,
        language,
        language_confidence,
        normalized_text,
        original_text: input.to_string(),
        preprocessing_time_ms: started.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_spanish_question() {
        let result = preprocess("¿Cuál es la capital de Francia?");
        assert_eq!(result.quality_flags, vec![QualityFlag::Ok]);
        assert_eq!(result.quality_score, 1.0);
        assert_eq!(result.language, DetectedLanguage::Es);
        assert_eq!(result.word_count, 6);
        assert!(!result.is_garbage());
    }

    #[test]
    fn symbol_salvo_is_garbage() {
        let result = preprocess("@@@@@@@@@@@@@@");
        assert!(result.quality_flags.contains(&QualityFlag::OnlySymbols));
        assert!(result.quality_flags.contains(&QualityFlag::RepeatedChars));
        assert!(result.is_garbage());
        assert!(result.quality_score < 0.3);
    }

    #[test]
    fn flags_never_empty() {
        for input in ["", "a", "hola", "@@@@", "   "] {
            let result = preprocess(input);
            assert!(!result.quality_flags.is_empty(), "input {input:?}");
        }
    }

    #[test]
    fn normalized_text_is_idempotent() {
        for input in [
            "holaaaaaa      mundo",
            "¿Qué    tal?",
            "@@@@@@@@@@@@@@",
            "ｈｏｌａ\u{200B}!",
        ] {
            let first = preprocess(input);
            let second = preprocess(&first.normalized_text);
            assert_eq!(
                first.normalized_text, second.normalized_text,
                "input {input:?}"
            );
        }
    }

    #[test]
    fn neutral_result_passes_text_through() {
        let result = PreprocessResult::neutral("tal cual");
        assert_eq!(result.normalized_text, "tal cual");
        assert_eq!(result.quality_flags, vec![QualityFlag::Ok]);
        assert_eq!(result.language, DetectedLanguage::Auto);
    }

    #[test]
    fn counts_follow_the_normalized_text() {
        let result = preprocess("hola      mundo");
        assert_eq!(result.normalized_text, "hola mundo");
        assert_eq!(result.char_count, 10);
        assert_eq!(result.word_count, 2);
    }

    #[test]
    fn never_panics_on_hostile_input() {
        for input in [
            "\u{0000}\u{0001}\u{0002}",
            "\u{FEFF}\u{200B}\u{200C}\u{200D}",
            "𝕳𝖔𝖑𝖆",
            "a\u{0301}a\u{0301}a\u{0301}a\u{0301}a\u{0301}a\u{0301}",
        ] {
            let _ = preprocess(input);
        }
    }
}
