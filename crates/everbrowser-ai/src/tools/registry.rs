use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{AiError, Result};
use crate::tools::traits::{Tool, ToolOutput, ToolSchema};

/// Tools the agent may call, keyed by the name the model uses.
///
/// Names are kept sorted so the schema list sent to the model is stable
/// between requests.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`ToolRegistry::register`].
    pub fn with_tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.register(tool);
        self
    }

    /// Add a tool. A tool with the same name is replaced.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Arc::new(tool)).is_some() {
            tracing::warn!(tool = %name, "Replacing previously registered tool");
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|tool| tool.schema()).collect()
    }

    pub async fn execute(&self, name: &str, input: Value) -> Result<ToolOutput> {
        match self.tools.get(name) {
            Some(tool) => tool.execute(input).await,
            None => Err(AiError::ToolNotFound(name.to_string())),
        }
    }
}
