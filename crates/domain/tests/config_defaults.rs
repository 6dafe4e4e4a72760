use charla_domain::config::{Config, ConfigSeverity};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 8080);
}

#[test]
fn default_thresholds_match_policy() {
    let config = Config::default();
    assert_eq!(config.pipeline.confidence_threshold_ok, 0.70);
    assert_eq!(config.pipeline.confidence_threshold_clarify, 0.40);
    assert_eq!(config.pipeline.max_clarification_attempts, 3);
    assert!(config.pipeline.enable_clarification);
    assert!(config.pipeline.enable_llm_fallback);
}

#[test]
fn default_session_lifecycle() {
    let config = Config::default();
    assert_eq!(config.sessions.inactivity_threshold_ms, 3_600_000);
    assert_eq!(config.sessions.cleanup_interval_ms, 300_000);
    assert_eq!(config.sessions.state_timeout_ms, 30_000);
}

#[test]
fn empty_config_validates_with_warnings_only() {
    let config = Config::default();
    let issues = config.validate();
    assert!(issues
        .iter()
        .all(|i| i.severity != ConfigSeverity::Error), "{issues:?}");
}

#[test]
fn partial_toml_fills_defaults() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 3210

[timeouts]
aggressive = true
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 3210);
    assert!(config.timeouts.aggressive);
    assert_eq!(config.pipeline.history_window, 10);
}

#[test]
fn bad_thresholds_are_rejected() {
    let toml_str = r#"
[pipeline]
confidence_threshold_ok = 0.3
confidence_threshold_clarify = 0.6
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error
            && i.field == "pipeline.confidence_threshold_clarify"));
}

#[test]
fn zero_stage_override_is_an_error() {
    let toml_str = r#"
[timeouts.overrides]
generation_ms = 0
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues.iter().any(|i| i.severity == ConfigSeverity::Error));
}

#[test]
fn model_strings_must_carry_a_provider() {
    let toml_str = r#"
[llm]
default_model = "grok-3-mini"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.field == "llm.default_model" && i.severity == ConfigSeverity::Error));
}

#[test]
fn fallback_message_overrides_parse() {
    let toml_str = r#"
[pipeline.fallback_messages]
TIMEOUT_GENERATION = "Tardé demasiado, perdona."
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(
        config.pipeline.fallback_messages.get("TIMEOUT_GENERATION").unwrap(),
        "Tardé demasiado, perdona."
    );
}
