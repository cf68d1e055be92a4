use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::llm::{ToolCall, ToolCallDelta};

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl PartialCall {
    fn merge(&mut self, delta: &ToolCallDelta) {
        // First id and name seen for an index win
        if self.id.is_none() {
            self.id = delta.id.clone();
        }
        if self.name.is_none() {
            self.name = delta.name.clone();
        }
        if let Some(fragment) = &delta.arguments {
            self.arguments.push_str(fragment);
        }
    }

    fn into_call(self, index: usize) -> ToolCall {
        ToolCall {
            id: self.id.unwrap_or_else(|| format!("call_{}", index)),
            name: self.name.unwrap_or_default(),
            arguments: parse_arguments(&self.arguments),
        }
    }
}

/// Collects streamed tool call fragments into whole calls, in stream index order.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, PartialCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn accumulate(&mut self, delta: &ToolCallDelta) {
        self.calls.entry(delta.index).or_default().merge(delta);
    }

    pub fn finalize(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .map(|(index, call)| call.into_call(index))
            .collect()
    }
}

/// Arguments that are missing or not valid JSON become `{}`.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!(len = raw.len(), error = %e, "Unparseable tool arguments, using {{}}");
        Value::Object(Map::new())
    })
}
