//! Primary→fallback gateway pair.
//!
//! The pipeline holds no opinion on provider selection beyond this: one
//! primary model, one fallback model, fallback tried exactly once when the
//! primary fails with a retryable error.

use std::sync::Arc;
use std::time::Instant;

use charla_domain::config::LlmConfig;
use charla_domain::{BoxStream, Error, ErrorCode, Result, TraceEvent};

use crate::openai_compat::OpenAiCompatGateway;
use crate::traits::{ChatMessage, ChatOptions, ChatOutcome, LlmGateway, StreamDelta};

struct Route {
    gateway: Arc<dyn LlmGateway>,
    provider_id: String,
    model: String,
}

/// A gateway that fails over from a primary model to a fallback model.
pub struct FailoverGateway {
    primary: Route,
    fallback: Option<Route>,
}

impl FailoverGateway {
    /// Wire both routes from the LLM config. A fallback whose provider is
    /// unavailable (missing key, no config entry) downgrades to
    /// primary-only with a warning.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let primary = Self::route_from_config(config, &config.default_model)?;
        let fallback = match Self::route_from_config(config, &config.fallback_model) {
            Ok(route) => Some(route),
            Err(e) => {
                tracing::warn!(error = %e, "fallback model unavailable, running primary-only");
                None
            }
        };
        Ok(Self { primary, fallback })
    }

    fn route_from_config(config: &LlmConfig, model_str: &str) -> Result<Route> {
        let (provider_id, model) = LlmConfig::split_model(model_str);
        if model.is_empty() {
            return Err(Error::Config(format!(
                "'{model_str}' is not of the form provider_id/model"
            )));
        }
        let provider_config = config.providers.get(provider_id).ok_or_else(|| {
            Error::Config(format!("no [llm.providers.{provider_id}] entry"))
        })?;
        let gateway = OpenAiCompatGateway::from_config(provider_id, provider_config, model)?;
        Ok(Route {
            gateway: Arc::new(gateway),
            provider_id: provider_id.to_string(),
            model: model.to_string(),
        })
    }

    /// Assemble from pre-built gateways (used by tests and embedders).
    pub fn new(
        primary: Arc<dyn LlmGateway>,
        primary_provider: impl Into<String>,
        primary_model: impl Into<String>,
        fallback: Option<(Arc<dyn LlmGateway>, String, String)>,
    ) -> Self {
        Self {
            primary: Route {
                gateway: primary,
                provider_id: primary_provider.into(),
                model: primary_model.into(),
            },
            fallback: fallback.map(|(gateway, provider_id, model)| Route {
                gateway,
                provider_id,
                model,
            }),
        }
    }

    pub fn primary_model(&self) -> &str {
        &self.primary.model
    }

    fn is_retryable(err: &Error) -> bool {
        ErrorCode::from_error(err).is_retryable()
    }

    /// Primary calls honor an explicit caller model override; the fallback
    /// route always pins its configured model.
    fn primary_opts(&self, opts: &ChatOptions) -> ChatOptions {
        let mut opts = opts.clone();
        if opts.model.is_none() {
            opts.model = Some(self.primary.model.clone());
        }
        opts
    }

    fn fallback_opts(route: &Route, opts: &ChatOptions) -> ChatOptions {
        let mut opts = opts.clone();
        opts.model = Some(route.model.clone());
        opts
    }
}

#[async_trait::async_trait]
impl LlmGateway for FailoverGateway {
    async fn chat(&self, messages: &[ChatMessage], opts: &ChatOptions) -> Result<ChatOutcome> {
        let start = Instant::now();
        let result = self
            .primary
            .gateway
            .chat(messages, &self.primary_opts(opts))
            .await;

        match &result {
            Ok(outcome) => {
                TraceEvent::LlmRequest {
                    provider: self.primary.provider_id.clone(),
                    model: self.primary.model.clone(),
                    streaming: false,
                    duration_ms: start.elapsed().as_millis() as u64,
                    tokens: outcome.tokens,
                }
                .emit();
                return result;
            }
            Err(e) if Self::is_retryable(e) && opts.enable_fallback => {
                tracing::warn!(
                    model = %self.primary.model,
                    error = %e,
                    "primary model failed, trying fallback"
                );
            }
            Err(_) => return result,
        }

        let Some(fallback) = &self.fallback else {
            return result;
        };

        TraceEvent::LlmFallback {
            from_model: self.primary.model.clone(),
            to_model: fallback.model.clone(),
            reason: result
                .as_ref()
                .err()
                .map(|e| e.to_string())
                .unwrap_or_default(),
        }
        .emit();

        let start = Instant::now();
        let outcome = fallback
            .gateway
            .chat(messages, &Self::fallback_opts(fallback, opts))
            .await?;
        TraceEvent::LlmRequest {
            provider: fallback.provider_id.clone(),
            model: fallback.model.clone(),
            streaming: false,
            duration_ms: start.elapsed().as_millis() as u64,
            tokens: outcome.tokens,
        }
        .emit();
        Ok(outcome)
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        opts: &ChatOptions,
    ) -> Result<BoxStream<'static, Result<StreamDelta>>> {
        // Failover applies only when opening the stream; a failure mid-stream
        // surfaces to the consumer.
        match self
            .primary
            .gateway
            .stream_chat(messages, &self.primary_opts(opts))
            .await
        {
            Ok(stream) => Ok(stream),
            Err(e) if Self::is_retryable(&e) && opts.enable_fallback => {
                let Some(fallback) = &self.fallback else {
                    return Err(e);
                };
                TraceEvent::LlmFallback {
                    from_model: self.primary.model.clone(),
                    to_model: fallback.model.clone(),
                    reason: e.to_string(),
                }
                .emit();
                fallback
                    .gateway
                    .stream_chat(messages, &Self::fallback_opts(fallback, opts))
                    .await
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Gateway stub that fails a fixed number of times, then answers.
    struct FlakyGateway {
        failures: AtomicUsize,
        error: fn() -> Error,
        answer: &'static str,
    }

    #[async_trait::async_trait]
    impl LlmGateway for FlakyGateway {
        async fn chat(&self, _: &[ChatMessage], opts: &ChatOptions) -> Result<ChatOutcome> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err((self.error)());
            }
            Ok(ChatOutcome {
                content: self.answer.to_string(),
                tokens: Some(7),
                provider: "stub".into(),
                model: opts.model.clone().unwrap_or_default(),
            })
        }

        async fn stream_chat(
            &self,
            _: &[ChatMessage],
            _: &ChatOptions,
        ) -> Result<BoxStream<'static, Result<StreamDelta>>> {
            Err(Error::Http("HTTP 503".into()))
        }
    }

    fn flaky(failures: usize, error: fn() -> Error, answer: &'static str) -> Arc<FlakyGateway> {
        Arc::new(FlakyGateway {
            failures: AtomicUsize::new(failures),
            error,
            answer,
        })
    }

    #[tokio::test]
    async fn primary_success_skips_fallback() {
        let gateway = FailoverGateway::new(
            flaky(0, || Error::Http("x".into()), "primario"),
            "xai",
            "grok-3-mini",
            Some((
                flaky(0, || Error::Http("x".into()), "secundario") as Arc<dyn LlmGateway>,
                "gemini".into(),
                "gemini-2.0-flash".into(),
            )),
        );

        let outcome = gateway
            .chat(&[ChatMessage::user("hola")], &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.content, "primario");
        assert_eq!(outcome.model, "grok-3-mini");
    }

    #[tokio::test]
    async fn retryable_failure_falls_over() {
        let gateway = FailoverGateway::new(
            flaky(1, || Error::Http("HTTP 503 unavailable".into()), "primario"),
            "xai",
            "grok-3-mini",
            Some((
                flaky(0, || Error::Http("x".into()), "secundario") as Arc<dyn LlmGateway>,
                "gemini".into(),
                "gemini-2.0-flash".into(),
            )),
        );

        let outcome = gateway
            .chat(&[ChatMessage::user("hola")], &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.content, "secundario");
        assert_eq!(outcome.model, "gemini-2.0-flash");
    }

    #[tokio::test]
    async fn fallback_disabled_by_options() {
        let gateway = FailoverGateway::new(
            flaky(1, || Error::Http("HTTP 503".into()), "primario"),
            "xai",
            "grok-3-mini",
            Some((
                flaky(0, || Error::Http("x".into()), "secundario") as Arc<dyn LlmGateway>,
                "gemini".into(),
                "gemini-2.0-flash".into(),
            )),
        );

        let opts = ChatOptions {
            enable_fallback: false,
            ..Default::default()
        };
        assert!(gateway.chat(&[ChatMessage::user("hola")], &opts).await.is_err());
    }

    #[tokio::test]
    async fn without_fallback_the_error_surfaces() {
        let gateway = FailoverGateway::new(
            flaky(1, || Error::Http("HTTP 429".into()), "primario"),
            "xai",
            "grok-3-mini",
            None,
        );
        let err = gateway
            .chat(&[ChatMessage::user("hola")], &ChatOptions::default())
            .await
            .unwrap_err();
        assert_eq!(ErrorCode::from_error(&err), ErrorCode::Upstream429);
    }
}
