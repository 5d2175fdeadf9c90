//! Typed adapter to the LLM service.
//!
//! A single call interface: given a model name, a system prompt, and an
//! ordered conversation, return the assistant's text reply. HTTP 429 is
//! surfaced as a distinguished rate-limit signal — the agent loop
//! handles it by sleeping and retrying the same turn.

mod anthropic;
mod mock;

use async_trait::async_trait;
use thiserror::Error;

use codemend_core::types::Message;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use mock::{RecordedRequest, ScriptedLlm};

/// LLM errors.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP 429 from the provider; retry the same turn after a backoff.
    #[error("rate limited by LLM service")]
    RateLimited,
    #[error("LLM http error: {0}")]
    Http(String),
    #[error("LLM service returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("LLM response decode error: {0}")]
    Decode(String),
}

/// LLM client trait.
#[async_trait]
pub trait LlmApi: Send + Sync {
    /// One turn of a conversation: the full history in, the assistant's
    /// text reply out.
    async fn complete(
        &self,
        model: &str,
        system: &str,
        messages: &[Message],
    ) -> Result<String, LlmError>;
}
