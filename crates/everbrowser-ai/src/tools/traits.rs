use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::Result;

/// What the model is told about a tool: its call name, a description and a
/// JSON Schema for the arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Outcome of a tool call as the model sees it.
///
/// A failed tool is still an answer: the model reads the error and decides
/// what to do next. Only infrastructure faults surface as `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Success(Value),
    Failure(String),
}

impl ToolOutput {
    pub fn success(result: Value) -> Self {
        ToolOutput::Success(result)
    }

    pub fn error(message: impl Into<String>) -> Self {
        ToolOutput::Failure(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutput::Success(_))
    }

    /// Text placed in the `tool` message. Strings go out unquoted.
    pub fn render(&self) -> String {
        match self {
            ToolOutput::Success(Value::String(text)) => text.clone(),
            ToolOutput::Success(other) => other.to_string(),
            ToolOutput::Failure(message) => json!({ "error": message }).to_string(),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model calls the tool by
    fn name(&self) -> &str;

    fn schema(&self) -> ToolSchema;

    async fn execute(&self, input: Value) -> Result<ToolOutput>;
}
