use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ConfigError;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM gateway
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Upstream model configuration. Model strings are `"provider_id/model"`,
/// e.g. `"xai/grok-3-mini"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Primary generation model.
    #[serde(default = "d_default_model")]
    pub default_model: String,

    /// Tried once when the primary fails with a retryable error.
    #[serde(default = "d_fallback_model")]
    pub fallback_model: String,

    /// Wall-clock budget for a single gateway call, unless the watchdog
    /// grants less.
    #[serde(default = "d_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "d_temperature")]
    pub temperature: f32,

    /// Provider connection settings, keyed by provider id.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

/// One upstream provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of an OpenAI-compatible chat-completions endpoint.
    pub base_url: String,

    /// Environment variable holding the API key. Unset means the provider
    /// is disabled.
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_model: d_default_model(),
            fallback_model: d_fallback_model(),
            default_timeout_ms: d_timeout_ms(),
            max_tokens: d_max_tokens(),
            temperature: d_temperature(),
            providers: HashMap::new(),
        }
    }
}

impl LlmConfig {
    /// Split a `"provider_id/model"` string into its two components.
    pub fn split_model(model: &str) -> (&str, &str) {
        match model.split_once('/') {
            Some((provider, name)) => (provider, name),
            None => (model, ""),
        }
    }

    pub(super) fn validate(&self, issues: &mut Vec<ConfigError>) {
        for (field, model) in [
            ("llm.default_model", &self.default_model),
            ("llm.fallback_model", &self.fallback_model),
        ] {
            let (provider, name) = Self::split_model(model);
            if name.is_empty() {
                issues.push(ConfigError::error(
                    field,
                    format!("'{model}' is not of the form provider_id/model"),
                ));
            } else if !self.providers.contains_key(provider) {
                issues.push(ConfigError::warning(
                    field,
                    format!("provider '{provider}' has no [llm.providers.{provider}] entry"),
                ));
            }
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            issues.push(ConfigError::error(
                "llm.temperature",
                format!("must be within [0, 2] (got {})", self.temperature),
            ));
        }

        if self.default_timeout_ms == 0 {
            issues.push(ConfigError::error(
                "llm.default_timeout_ms",
                "must be greater than zero",
            ));
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_default_model() -> String {
    "xai/grok-3-mini".into()
}
fn d_fallback_model() -> String {
    "gemini/gemini-2.0-flash".into()
}
fn d_timeout_ms() -> u64 {
    8_000
}
fn d_max_tokens() -> u32 {
    1_024
}
fn d_temperature() -> f32 {
    0.7
}
