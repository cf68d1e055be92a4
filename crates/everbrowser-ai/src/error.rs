//! Error types for the AI module

use thiserror::Error;

/// AI module error types
#[derive(Error, Debug)]
pub enum AiError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("{provider} request failed with HTTP {status}: {message}")]
    LlmHttp {
        provider: String,
        status: u16,
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Max tool rounds reached: {0}")]
    MaxIterations(usize),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AiError {
    /// Whether a fresh attempt of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::LlmHttp { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            AiError::Http(err) => err.is_timeout() || err.is_connect(),
            AiError::Llm(message) => {
                let lower = message.to_lowercase();
                ["rate limit", "timeout", "timed out", "overloaded", "connection"]
                    .iter()
                    .any(|needle| lower.contains(needle))
            }
            _ => false,
        }
    }

    /// Server-provided `Retry-After` hint, in seconds.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            AiError::LlmHttp {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Result type alias for AI operations
pub type Result<T> = std::result::Result<T, AiError>;
