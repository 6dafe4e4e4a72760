//! External collaborators of the pipeline, behind narrow traits: the LLM
//! gateway, the prompt analyzer, and the retrieval backend.
//!
//! Ships one HTTP gateway adapter (any OpenAI-compatible chat-completions
//! endpoint — xAI and Gemini both expose one), a primary→fallback failover
//! wrapper, a keyword-bank analyzer so the pipeline runs without an external
//! NLU, and the null retriever.

pub mod failover;
pub mod heuristic;
pub mod null;
pub mod openai_compat;
mod sse;
pub mod traits;

pub use failover::FailoverGateway;
pub use heuristic::HeuristicAnalyzer;
pub use null::NullRetriever;
pub use openai_compat::OpenAiCompatGateway;
pub use traits::{
    provider_tag, AnalyzeContext, ChatMessage, ChatOptions, ChatOutcome, ChatRole, LlmGateway,
    PromptAnalyzer, RetrieveContext, Retriever, StreamDelta,
};
