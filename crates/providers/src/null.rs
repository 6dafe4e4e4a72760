use charla_domain::{Result, Source};

use crate::traits::{RetrieveContext, Retriever};

/// Retriever with no backend: every query yields zero sources. The
/// orchestrator treats an empty result as a legitimate outcome, so this is
/// the safe default wiring until a real backend exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRetriever;

#[async_trait::async_trait]
impl Retriever for NullRetriever {
    async fn retrieve(&self, _query: &str, _ctx: &RetrieveContext) -> Result<Vec<Source>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_empty() {
        let sources = NullRetriever
            .retrieve("capital de francia", &RetrieveContext::default())
            .await
            .unwrap();
        assert!(sources.is_empty());
    }
}
