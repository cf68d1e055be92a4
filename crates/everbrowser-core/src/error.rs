//! Error types for the orchestrator core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid orchestrator config: {0}")]
    InvalidConfig(String),

    #[error("Agent is not ready yet")]
    AgentNotReady,

    #[error(transparent)]
    Ai(#[from] everbrowser_ai::AiError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
