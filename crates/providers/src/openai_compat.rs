//! OpenAI-compatible gateway adapter.
//!
//! Works with any endpoint that follows the OpenAI chat-completions
//! contract — xAI's API and Gemini's OpenAI compatibility endpoint both do.

use serde_json::Value;

use charla_domain::config::ProviderConfig;
use charla_domain::{BoxStream, Error, Result};

use crate::sse::sse_response_stream;
use crate::traits::{ChatMessage, ChatOptions, ChatOutcome, ChatRole, LlmGateway, StreamDelta};

/// One OpenAI-compatible upstream endpoint.
pub struct OpenAiCompatGateway {
    provider_id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatGateway {
    /// Build the adapter from its config entry. The API key is read from
    /// the configured environment variable; an unset variable disables the
    /// provider at boot rather than failing mid-turn.
    pub fn from_config(
        provider_id: &str,
        config: &ProviderConfig,
        default_model: &str,
    ) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            Error::Config(format!(
                "provider '{provider_id}': environment variable {} is not set",
                config.api_key_env
            ))
        })?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            provider_id: provider_id.to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.to_string(),
            client,
        })
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn effective_model(&self, opts: &ChatOptions) -> String {
        opts.model
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn build_body(&self, messages: &[ChatMessage], opts: &ChatOptions, stream: bool) -> Value {
        let messages: Vec<Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": role_to_str(m.role),
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.effective_model(opts),
            "messages": messages,
            "temperature": opts.temperature,
            "stream": stream,
        });
        if let Some(max) = opts.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }

    async fn post(&self, body: &Value, opts: &ChatOptions) -> Result<reqwest::Response> {
        self.client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .timeout(opts.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))
    }
}

fn role_to_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(provider_id: &str, body: &Value) -> Result<(String, Option<u32>, String)> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider_id.to_string(),
            message: "no choices in response".into(),
        })?;

    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let tokens = body
        .get("usage")
        .and_then(|u| u.get("total_tokens"))
        .and_then(|v| v.as_u64())
        .map(|t| t as u32);

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    Ok((content, tokens, model))
}

/// Parse one SSE `data:` payload into at most one delta.
fn parse_sse_data(data: &str) -> Option<Result<StreamDelta>> {
    if data.trim() == "[DONE]" {
        return Some(Ok(StreamDelta {
            content: String::new(),
            done: true,
        }));
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return Some(Err(Error::Json(e))),
    };

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())?;

    if choice
        .get("finish_reason")
        .and_then(|f| f.as_str())
        .is_some()
    {
        return Some(Ok(StreamDelta {
            content: String::new(),
            done: true,
        }));
    }

    let text = choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|v| v.as_str())?;
    if text.is_empty() {
        return None;
    }
    Some(Ok(StreamDelta {
        content: text.to_string(),
        done: false,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmGateway for OpenAiCompatGateway {
    async fn chat(&self, messages: &[ChatMessage], opts: &ChatOptions) -> Result<ChatOutcome> {
        let body = self.build_body(messages, opts, false);
        tracing::debug!(provider = %self.provider_id, "chat request");

        let resp = self.post(&body, opts).await?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.provider_id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }

        let json: Value = serde_json::from_str(&text)?;
        let (content, tokens, model) = parse_chat_response(&self.provider_id, &json)?;
        Ok(ChatOutcome {
            content,
            tokens,
            provider: self.provider_id.clone(),
            model,
        })
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        opts: &ChatOptions,
    ) -> Result<BoxStream<'static, Result<StreamDelta>>> {
        let body = self.build_body(messages, opts, true);
        tracing::debug!(provider = %self.provider_id, "stream request");

        let resp = self.post(&body, opts).await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .map_err(|e| Error::Http(e.to_string()))?;
            return Err(Error::Provider {
                provider: self.provider_id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }

        Ok(sse_response_stream(resp, parse_sse_data))
    }
}
