//! Optional LLM rephrasing of the clarifying question.
//!
//! The call is tightly bounded (100 tokens, 2 s, temperature 0.3) and its
//! output is accepted only when it looks like a plausible question; anything
//! else keeps the template. A gateway failure is never fatal.

use std::time::Duration;

use charla_providers::{ChatMessage, ChatOptions, LlmGateway};

const REPHRASE_MAX_TOKENS: u32 = 100;
const REPHRASE_TIMEOUT: Duration = Duration::from_secs(2);
const REPHRASE_TEMPERATURE: f32 = 0.3;

/// Accepted output length, exclusive bounds.
const MIN_LEN: usize = 5;
const MAX_LEN: usize = 200;

const SYSTEM_PROMPT: &str = "Eres un asistente conversacional. Reformula la siguiente \
pregunta aclaratoria en español de forma natural y breve, manteniendo su intención. \
Responde solo con la pregunta reformulada.";

/// Ask the gateway to rephrase `question` for the current conversation.
/// Returns the template question untouched on any failure or implausible
/// output.
pub async fn rephrase(
    gateway: &dyn LlmGateway,
    question: &str,
    recent_history: &[String],
) -> String {
    let mut prompt = String::new();
    if !recent_history.is_empty() {
        prompt.push_str("Conversación reciente:\n");
        for line in recent_history {
            prompt.push_str(line);
            prompt.push('\n');
        }
        prompt.push('\n');
    }
    prompt.push_str("Pregunta a reformular: ");
    prompt.push_str(question);

    let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];
    let opts = ChatOptions {
        model: None,
        temperature: REPHRASE_TEMPERATURE,
        timeout: REPHRASE_TIMEOUT,
        max_tokens: Some(REPHRASE_MAX_TOKENS),
        enable_fallback: false,
    };

    match gateway.chat(&messages, &opts).await {
        Ok(outcome) => {
            let rephrased = outcome.content.trim();
            if plausible(rephrased) {
                rephrased.to_string()
            } else {
                tracing::debug!(
                    len = rephrased.chars().count(),
                    "rephrased question rejected, keeping template"
                );
                question.to_string()
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "rephrase call failed, keeping template");
            question.to_string()
        }
    }
}

fn plausible(text: &str) -> bool {
    let len = text.chars().count();
    len > MIN_LEN && len < MAX_LEN
}

#[cfg(test)]
mod tests {
    use super::*;
    use charla_domain::{BoxStream, Error, Result};
    use charla_providers::{ChatOutcome, StreamDelta};

    struct CannedGateway {
        reply: Option<&'static str>,
    }

    #[async_trait::async_trait]
    impl LlmGateway for CannedGateway {
        async fn chat(&self, _: &[ChatMessage], opts: &ChatOptions) -> Result<ChatOutcome> {
            assert_eq!(opts.max_tokens, Some(100));
            assert_eq!(opts.timeout, Duration::from_secs(2));
            assert!(opts.temperature <= 0.3);
            match self.reply {
                Some(reply) => Ok(ChatOutcome {
                    content: reply.to_string(),
                    tokens: Some(20),
                    provider: "stub".into(),
                    model: "stub".into(),
                }),
                None => Err(Error::Http("HTTP 503".into())),
            }
        }

        async fn stream_chat(
            &self,
            _: &[ChatMessage],
            _: &ChatOptions,
        ) -> Result<BoxStream<'static, Result<StreamDelta>>> {
            unimplemented!("rephrasing never streams")
        }
    }

    #[tokio::test]
    async fn good_output_replaces_the_template() {
        let gateway = CannedGateway {
            reply: Some("¿Prefieres que investigue o que analice tu documento?"),
        };
        let result = rephrase(&gateway, "¿Quieres investigar o analizar?", &[]).await;
        assert_eq!(result, "¿Prefieres que investigue o que analice tu documento?");
    }

    #[tokio::test]
    async fn short_output_keeps_the_template() {
        let gateway = CannedGateway { reply: Some("¿Eh?") };
        let result = rephrase(&gateway, "¿Quieres investigar o analizar?", &[]).await;
        assert_eq!(result, "¿Quieres investigar o analizar?");
    }

    #[tokio::test]
    async fn overlong_output_keeps_the_template() {
        let gateway = CannedGateway {
            reply: Some(
                "Esta reformulación es absurdamente larga porque el modelo decidió \
                 escribir un párrafo entero en lugar de una pregunta breve, repitiendo \
                 ideas una y otra vez hasta superar con holgura el límite de longitud \
                 permitido para una pregunta aclaratoria razonable.",
            ),
        };
        let template = "¿Quieres investigar o analizar?";
        assert_eq!(rephrase(&gateway, template, &[]).await, template);
    }

    #[tokio::test]
    async fn gateway_failure_keeps_the_template() {
        let gateway = CannedGateway { reply: None };
        let template = "¿Puedes darme más detalles?";
        assert_eq!(rephrase(&gateway, template, &[]).await, template);
    }
}
