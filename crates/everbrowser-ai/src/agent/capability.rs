use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::llm::{Message, ToolCall};

/// Conversation role of a stored turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

/// One role-tagged message in a conversation. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
}

impl Turn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(TurnRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }

    pub fn is_system(&self) -> bool {
        self.role == TurnRole::System
    }
}

impl From<&Turn> for Message {
    fn from(turn: &Turn) -> Self {
        match turn.role {
            TurnRole::System => Message::system(turn.content.clone()),
            TurnRole::User => Message::user(turn.content.clone()),
            TurnRole::Assistant => Message::assistant(turn.content.clone()),
        }
    }
}

/// Tool invocation announced by the agent mid-turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl From<ToolCall> for ToolInvocation {
    fn from(call: ToolCall) -> Self {
        Self {
            id: call.id,
            name: call.name,
            arguments: call.arguments,
        }
    }
}

/// One increment of agent output during a streamed turn.
#[derive(Debug, Clone, PartialEq)]
pub enum RawUnit {
    TextDelta { text: String },
    ToolCallDelta { text: String, call: ToolInvocation },
}

impl RawUnit {
    pub fn text(text: impl Into<String>) -> Self {
        RawUnit::TextDelta { text: text.into() }
    }

    pub fn tool_call(call: ToolInvocation) -> Self {
        RawUnit::ToolCallDelta {
            text: String::new(),
            call,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            RawUnit::TextDelta { text } | RawUnit::ToolCallDelta { text, .. } => text,
        }
    }
}

pub type RawUnitStream = Pin<Box<dyn Stream<Item = Result<RawUnit>> + Send>>;

/// A tool-using language model agent, seen as an opaque streaming capability.
///
/// The first system turn of `history` carries the standing instructions.
#[async_trait]
pub trait AgentCapability: Send + Sync {
    /// Run one agent turn (which may include tool rounds) over `history`.
    fn stream_turn(&self, history: Vec<Turn>) -> RawUnitStream;

    /// Single non-streamed answer over `history`. Never invokes tools.
    async fn invoke_turn(&self, history: Vec<Turn>) -> Result<String>;
}
