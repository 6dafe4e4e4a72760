//! Shared application state threaded through the API handlers and the
//! orchestrator.

use std::sync::Arc;

use charla_clarify::ClarificationPolicy;
use charla_dialogue::SessionRegistry;
use charla_domain::config::Config;
use charla_providers::{LlmGateway, PromptAnalyzer, Retriever};
use charla_watchdog::StageBudgets;

/// Everything a turn needs. Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub gateway: Arc<dyn LlmGateway>,
    pub analyzer: Arc<dyn PromptAnalyzer>,
    pub retriever: Option<Arc<dyn Retriever>>,
    pub policy: Arc<ClarificationPolicy>,
}

impl AppState {
    /// Budgets for one new turn, resolved from config.
    pub fn budgets(&self) -> StageBudgets {
        StageBudgets::from_config(&self.config.timeouts)
    }
}
