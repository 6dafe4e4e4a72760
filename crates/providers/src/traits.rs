use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use charla_domain::{AnalysisResult, BoxStream, ProviderTag, Result, Source};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One conversation message sent to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call gateway options.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// `"provider_id/model"`; `None` uses the gateway's configured default.
    pub model: Option<String>,
    pub temperature: f32,
    /// Wall-clock budget for the call; adapters must respect it.
    pub timeout: Duration,
    pub max_tokens: Option<u32>,
    /// Allow the gateway to try its fallback model on retryable failures.
    pub enable_fallback: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.7,
            timeout: Duration::from_secs(8),
            max_tokens: None,
            enable_fallback: true,
        }
    }
}

/// A completed (non-streaming) generation.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub tokens: Option<u32>,
    /// Provider id that actually served the call (e.g. `"xai"`).
    pub provider: String,
    /// Model that actually produced the response.
    pub model: String,
}

/// One streaming increment. `done: true` is the last item a well-behaved
/// stream yields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDelta {
    pub content: String,
    pub done: bool,
}

/// Map a config provider id to the wire provider tag.
pub fn provider_tag(provider_id: &str) -> Option<ProviderTag> {
    match provider_id {
        "xai" => Some(ProviderTag::Xai),
        "gemini" => Some(ProviderTag::Gemini),
        "anthropic" => Some(ProviderTag::Anthropic),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The LLM gateway consumed by the pipeline.
///
/// Implementations translate between these types and a provider's wire
/// format. Both calls must observe `opts.timeout`; streaming adapters must
/// stop when the consumer drops the stream.
#[async_trait::async_trait]
pub trait LlmGateway: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], opts: &ChatOptions) -> Result<ChatOutcome>;

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        opts: &ChatOptions,
    ) -> Result<BoxStream<'static, Result<StreamDelta>>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Analyzer trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Context handed to the prompt analyzer along with the message.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeContext {
    pub session_id: String,
    pub user_id: Option<String>,
    pub chat_id: Option<String>,
    pub run_id: Uuid,
    /// Trailing conversation window, oldest first.
    pub history: Vec<ChatMessage>,
    pub attachment_names: Vec<String>,
}

/// The external NLU.
#[async_trait::async_trait]
pub trait PromptAnalyzer: Send + Sync {
    async fn analyze(&self, message: &str, ctx: &AnalyzeContext) -> Result<AnalysisResult>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retriever trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct RetrieveContext {
    pub session_id: String,
    pub intent: String,
    pub language: Option<String>,
}

/// The retrieval backend. Zero results are legitimate; errors are absorbed
/// by the orchestrator and degrade to zero sources.
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, ctx: &RetrieveContext) -> Result<Vec<Source>>;
}
