//! User-visible fallback text selection.

use charla_domain::config::Config;
use charla_domain::{default_fallback_text, ErrorCode};

/// The Spanish fallback message for an error code, honoring per-deployment
/// overrides from `[pipeline.fallback_messages]`.
pub fn fallback_text(config: &Config, code: ErrorCode) -> String {
    let key = serde_json::to_value(code)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default();
    config
        .pipeline
        .fallback_messages
        .get(&key)
        .cloned()
        .unwrap_or_else(|| default_fallback_text(code).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_text_when_no_override() {
        let config = Config::default();
        assert!(fallback_text(&config, ErrorCode::TimeoutGeneration)
            .contains("tardó demasiado"));
    }

    #[test]
    fn override_wins() {
        let mut config = Config::default();
        config
            .pipeline
            .fallback_messages
            .insert("TIMEOUT_GENERATION".into(), "Perdona la demora.".into());
        assert_eq!(
            fallback_text(&config, ErrorCode::TimeoutGeneration),
            "Perdona la demora."
        );
        // Other codes keep their defaults.
        assert!(fallback_text(&config, ErrorCode::GarbageInput).contains("entender"));
    }
}
