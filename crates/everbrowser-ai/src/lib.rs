//! everBrowser AI - the agent capability behind the chat daemon
//!
//! This crate provides:
//! - Conversation turn and raw output unit types shared with the orchestrator
//! - The `AgentCapability` contract (streaming turn + one-shot turn)
//! - An OpenAI-compatible streaming LLM client
//! - Tool registry and the page fetch tool
//! - `ToolAgent`, a tool-calling loop that streams raw units

pub mod agent;
pub mod error;
mod http_client;
pub mod llm;
pub mod text_utils;
pub mod tools;

// Re-export commonly used types
pub use agent::{
    AgentCapability, RawUnit, RawUnitStream, ToolAgent, ToolInvocation, Turn, TurnRole,
};
pub use error::{AiError, Result};
pub use llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, LlmRetryConfig, Message,
    OpenAIClient, Role, StreamChunk, StreamResult, TokenUsage, ToolCall, ToolCallDelta,
};
#[cfg(any(test, feature = "test-utils"))]
pub use llm::{MockLlmClient, MockStep};
pub use tools::{PageFetchTool, Tool, ToolOutput, ToolRegistry, ToolSchema};
