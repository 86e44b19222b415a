//! Text-generation and embedding capability
//!
//! The retrieval-augmented builder only sees the [`LanguageModel`] trait.
//! [`client::HttpLanguageModel`] talks to a remote provider and
//! [`stub::HashingLanguageModel`] is a deterministic offline stand-in.

pub mod client;
pub mod stub;

pub use client::HttpLanguageModel;
pub use stub::HashingLanguageModel;

use async_trait::async_trait;
use thiserror::Error;

/// Model errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// API error from the provider
    #[error("LLM API error: {0}")]
    Api(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type LlmResult<T> = Result<T, LlmError>;

/// Prompt -> text and texts -> vectors
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Short provider/model label for logs
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> LlmResult<String>;

    /// One vector per input text, all of the same dimension
    async fn embed(&self, texts: &[String]) -> LlmResult<Vec<Vec<f32>>>;
}

/// Pull the first fenced code block (```json ... ```) out of a response,
/// or return the trimmed response when there is none.
pub fn extract_fenced(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[open + 3..];
    let body_start = after.find('\n').map_or(0, |i| i + 1);
    let body = &after[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}
