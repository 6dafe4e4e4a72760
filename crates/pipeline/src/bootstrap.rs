//! AppState construction shared by `serve` and embedders.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use charla_clarify::ClarificationPolicy;
use charla_dialogue::{FsmConfig, RegistryConfig, SessionRegistry};
use charla_domain::config::{Config, ConfigSeverity};
use charla_providers::{FailoverGateway, HeuristicAnalyzer, NullRetriever};

use crate::state::AppState;

/// Validate the config and wire every subsystem.
///
/// The default wiring uses the built-in heuristic analyzer and the null
/// retriever; deployments with a real NLU or retrieval backend construct
/// [`AppState`] directly with their own trait objects.
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let registry = Arc::new(SessionRegistry::new(RegistryConfig {
        fsm: FsmConfig {
            max_clarification_attempts: config.pipeline.max_clarification_attempts,
            confidence_ok: config.pipeline.confidence_threshold_ok,
            confidence_clarify: config.pipeline.confidence_threshold_clarify,
            state_timeout: Duration::from_millis(config.sessions.state_timeout_ms),
        },
        inactivity_threshold: Duration::from_millis(config.sessions.inactivity_threshold_ms),
        cleanup_interval: Duration::from_millis(config.sessions.cleanup_interval_ms),
    }));

    let gateway =
        Arc::new(FailoverGateway::from_config(&config.llm).context("wiring the LLM gateway")?);

    let policy = Arc::new(ClarificationPolicy::new(
        config.pipeline.enable_clarification,
        config.pipeline.max_clarification_attempts,
    ));

    Ok(AppState {
        config,
        registry,
        gateway,
        analyzer: Arc::new(HeuristicAnalyzer::new()),
        retriever: Some(Arc::new(NullRetriever)),
        policy,
    })
}
