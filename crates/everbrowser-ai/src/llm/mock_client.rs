//! Deterministic mock LLM client for agent loop tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{Duration, sleep};

use crate::error::{AiError, Result};

use super::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Role, StreamChunk,
    StreamResult, TokenUsage, ToolCall, ToolCallDelta,
};

/// Deterministic step for scripted mock completions.
#[derive(Debug, Clone)]
pub enum MockStepKind {
    /// Return a plain assistant message, streamed as the given pieces.
    Text(Vec<String>),
    /// Return a tool call response, optionally preceded by text.
    ToolCall {
        preface: Option<String>,
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// Return an LLM error.
    Error(String),
}

/// Scripted completion step with optional delay.
#[derive(Debug, Clone)]
pub struct MockStep {
    pub delay_ms: u64,
    pub kind: MockStepKind,
}

impl MockStep {
    pub fn text(content: impl Into<String>) -> Self {
        Self::text_pieces([content])
    }

    pub fn text_pieces<I, S>(pieces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            delay_ms: 0,
            kind: MockStepKind::Text(pieces.into_iter().map(Into::into).collect()),
        }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            delay_ms: 0,
            kind: MockStepKind::ToolCall {
                preface: None,
                id: id.into(),
                name: name.into(),
                arguments,
            },
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            delay_ms: 0,
            kind: MockStepKind::Error(message.into()),
        }
    }

    pub fn with_preface(mut self, text: impl Into<String>) -> Self {
        if let MockStepKind::ToolCall { preface, .. } = &mut self.kind {
            *preface = Some(text.into());
        }
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

/// A deterministic mock LLM client driven by scripted steps.
///
/// Every request, streamed or not, consumes one step and is recorded so tests
/// can inspect what the agent sent.
#[derive(Debug, Clone, Default)]
pub struct MockLlmClient {
    model: String,
    script: Arc<Mutex<VecDeque<MockStep>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self::from_steps(model, Vec::new())
    }

    pub fn from_steps(model: impl Into<String>, steps: Vec<MockStep>) -> Self {
        Self {
            model: model.into(),
            script: Arc::new(Mutex::new(VecDeque::from(steps))),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn push_step(&self, step: MockStep) {
        self.script.lock().await.push_back(step);
    }

    /// Requests received so far, oldest first.
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    async fn next_step(&self, request: &CompletionRequest) -> Option<MockStep> {
        self.requests.lock().await.push(request.clone());
        let step = self.script.lock().await.pop_front();
        if let Some(step) = &step
            && step.delay_ms > 0
        {
            sleep(Duration::from_millis(step.delay_ms)).await;
        }
        step
    }

    fn usage_for(content_len: usize) -> TokenUsage {
        let completion_tokens = content_len as u32;
        TokenUsage {
            prompt_tokens: 1,
            completion_tokens,
            total_tokens: 1 + completion_tokens,
        }
    }

    fn fallback_text(request: &CompletionRequest) -> String {
        request
            .messages
            .iter()
            .rev()
            .find(|msg| matches!(msg.role, Role::User))
            .map(|msg| format!("mock-echo: {}", msg.content))
            .unwrap_or_else(|| "mock-ok".to_string())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let Some(step) = self.next_step(&request).await else {
            let text = Self::fallback_text(&request);
            return Ok(CompletionResponse {
                usage: Some(Self::usage_for(text.len())),
                content: Some(text),
                tool_calls: Vec::new(),
                finish_reason: FinishReason::Stop,
            });
        };

        match step.kind {
            MockStepKind::Text(pieces) => {
                let content = pieces.concat();
                Ok(CompletionResponse {
                    usage: Some(Self::usage_for(content.len())),
                    content: Some(content),
                    tool_calls: Vec::new(),
                    finish_reason: FinishReason::Stop,
                })
            }
            MockStepKind::ToolCall {
                preface,
                id,
                name,
                arguments,
            } => Ok(CompletionResponse {
                usage: Some(Self::usage_for(0)),
                content: preface,
                tool_calls: vec![ToolCall {
                    id,
                    name,
                    arguments,
                }],
                finish_reason: FinishReason::ToolCalls,
            }),
            MockStepKind::Error(message) => Err(AiError::Llm(message)),
        }
    }

    fn complete_stream(&self, request: CompletionRequest) -> StreamResult {
        let client = self.clone();
        Box::pin(async_stream::stream! {
            let Some(step) = client.next_step(&request).await else {
                yield Ok(StreamChunk::text(MockLlmClient::fallback_text(&request)));
                yield Ok(StreamChunk::final_chunk(FinishReason::Stop, None));
                return;
            };

            match step.kind {
                MockStepKind::Text(pieces) => {
                    for piece in pieces {
                        yield Ok(StreamChunk::text(piece));
                    }
                    yield Ok(StreamChunk::final_chunk(FinishReason::Stop, None));
                }
                MockStepKind::ToolCall { preface, id, name, arguments } => {
                    if let Some(text) = preface {
                        yield Ok(StreamChunk::text(text));
                    }
                    // Split the arguments the way providers fragment them
                    let args = arguments.to_string();
                    let mid = crate::text_utils::floor_char_boundary(&args, args.len() / 2);
                    yield Ok(StreamChunk::tool_call(ToolCallDelta {
                        index: 0,
                        id: Some(id.clone()),
                        name: Some(name.clone()),
                        arguments: Some(args[..mid].to_string()),
                    }));
                    yield Ok(StreamChunk::tool_call(ToolCallDelta {
                        index: 0,
                        id: Some(id),
                        name: Some(name),
                        arguments: Some(args[mid..].to_string()),
                    }));
                    yield Ok(StreamChunk::final_chunk(FinishReason::ToolCalls, None));
                }
                MockStepKind::Error(message) => {
                    yield Err(AiError::Llm(message));
                }
            }
        })
    }
}
