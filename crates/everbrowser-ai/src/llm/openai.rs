//! OpenAI-compatible chat completions client.
//!
//! Any endpoint speaking `/chat/completions` works, so `model.base_url` can
//! point at OpenAI itself or at a compatible gateway.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AiError, Result};
use crate::http_client::build_http_client;
use crate::llm::client::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Message, StreamChunk,
    StreamResult, TokenUsage, ToolCall, ToolCallDelta,
};
use crate::llm::retry::{LlmRetryConfig, error_from_response, with_retry};
use crate::tools::ToolSchema;

const PROVIDER: &str = "OpenAI";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// One authenticated POST target. Cloned into streams so they own it.
#[derive(Clone)]
struct Transport {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl Transport {
    /// Send once; non-2xx statuses become errors.
    async fn post(&self, body: &Value) -> Result<Response> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response, PROVIDER).await)
        }
    }
}

fn endpoint_for(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

pub struct OpenAIClient {
    transport: Transport,
    model: String,
    retry: LlmRetryConfig,
}

impl OpenAIClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            transport: Transport {
                client: build_http_client(),
                api_key: api_key.into(),
                endpoint: endpoint_for(DEFAULT_BASE_URL),
            },
            model: DEFAULT_MODEL.to_string(),
            retry: LlmRetryConfig::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point at a compatible gateway instead of api.openai.com
    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> Self {
        self.transport.endpoint = endpoint_for(base_url.as_ref());
        self
    }

    pub fn with_retry_config(mut self, retry: LlmRetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> &str {
        &self.transport.endpoint
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> Result<Value> {
        let body = ChatBody {
            model: &self.model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            tools: request.tools.iter().map(WireTool::from).collect(),
            temperature: request.temperature,
            stream: stream.then_some(true),
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        };
        Ok(serde_json::to_value(body)?)
    }
}

// Outgoing wire format. Borrowed from the request, serialized once.

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    /// `null` for an assistant message that only carries tool calls
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall<'a>>,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(message: &'a Message) -> Self {
        let content = if message.content.is_empty() && !message.tool_calls.is_empty() {
            None
        } else {
            Some(message.content.as_str())
        };
        Self {
            role: message.role.as_str(),
            content,
            tool_call_id: message.tool_call_id.as_deref(),
            tool_calls: message.tool_calls.iter().map(WireToolCall::from).collect(),
        }
    }
}

#[derive(Serialize)]
struct WireToolCall<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall<'a>,
}

#[derive(Serialize)]
struct WireFunctionCall<'a> {
    name: &'a str,
    /// The API expects arguments as a JSON-encoded string
    arguments: String,
}

impl<'a> From<&'a ToolCall> for WireToolCall<'a> {
    fn from(call: &'a ToolCall) -> Self {
        Self {
            id: &call.id,
            kind: "function",
            function: WireFunctionCall {
                name: &call.name,
                arguments: call.arguments.to_string(),
            },
        }
    }
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

impl<'a> From<&'a ToolSchema> for WireTool<'a> {
    fn from(schema: &'a ToolSchema) -> Self {
        Self {
            kind: "function",
            function: WireFunction {
                name: &schema.name,
                description: &schema.description,
                parameters: &schema.parameters,
            },
        }
    }
}

// Incoming wire format

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ReplyToolCall>,
}

#[derive(Deserialize)]
struct ReplyToolCall {
    id: String,
    function: ReplyFunction,
}

#[derive(Deserialize)]
struct ReplyFunction {
    name: String,
    arguments: String,
}

impl From<ReplyToolCall> for ToolCall {
    fn from(call: ReplyToolCall) -> Self {
        // Keep malformed arguments visible to the tool instead of dropping them
        let arguments = serde_json::from_str(&call.function.arguments)
            .unwrap_or(Value::String(call.function.arguments));
        ToolCall {
            id: call.id,
            name: call.function.name,
            arguments,
        }
    }
}

#[derive(Deserialize, Debug)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<WireUsage> for TokenUsage {
    fn from(usage: WireUsage) -> Self {
        TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

#[derive(Deserialize, Debug)]
struct ChunkEvent {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize, Debug)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChunkDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Deserialize, Debug)]
struct ChunkToolCall {
    index: usize,
    id: Option<String>,
    function: Option<ChunkFunction>,
}

#[derive(Deserialize, Debug)]
struct ChunkFunction {
    name: Option<String>,
    arguments: Option<String>,
}

/// Splits a byte stream into SSE `data:` payloads.
///
/// Only complete lines are decoded, so multi-byte characters split across
/// network chunks are reassembled before UTF-8 conversion.
#[derive(Debug, Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(data) = data_payload(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Drain a trailing line that lacked its newline (e.g. after a network
    /// interruption).
    fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.pending);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?.trim();
    if data.is_empty() {
        None
    } else {
        Some(data.to_string())
    }
}

/// Turns streamed `chat.completion.chunk` payloads into [`StreamChunk`]s.
#[derive(Debug, Default)]
struct StreamDecoder {
    tool_call_ids: HashMap<usize, String>,
    tool_call_names: HashMap<usize, String>,
}

impl StreamDecoder {
    fn decode(&mut self, data: &str) -> Vec<StreamChunk> {
        if data == "[DONE]" {
            return Vec::new();
        }

        let parsed: ChunkEvent = match serde_json::from_str(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparseable stream event");
                return Vec::new();
            }
        };

        let mut chunks = Vec::new();
        for choice in parsed.choices {
            if let Some(delta) = choice.delta {
                if let Some(content) = delta.content
                    && !content.is_empty()
                {
                    chunks.push(StreamChunk::text(content));
                }

                for tc in delta.tool_calls {
                    // Providers send id and name only on the first fragment
                    if let Some(id) = &tc.id {
                        self.tool_call_ids.insert(tc.index, id.clone());
                    }
                    if let Some(name) = tc.function.as_ref().and_then(|f| f.name.clone()) {
                        self.tool_call_names.insert(tc.index, name);
                    }

                    chunks.push(StreamChunk::tool_call(ToolCallDelta {
                        index: tc.index,
                        id: self.tool_call_ids.get(&tc.index).cloned(),
                        name: self.tool_call_names.get(&tc.index).cloned(),
                        arguments: tc.function.and_then(|f| f.arguments),
                    }));
                }
            }

            if let Some(reason) = choice.finish_reason {
                chunks.push(StreamChunk::final_chunk(
                    FinishReason::from_openai(&reason),
                    None,
                ));
            }
        }

        // Usage arrives in its own event after the finish reason
        if let Some(usage) = parsed.usage {
            chunks.push(StreamChunk {
                usage: Some(usage.into()),
                ..StreamChunk::default()
            });
        }

        chunks
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    fn provider(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.build_body(&request, false)?;
        let response = with_retry(&self.retry, PROVIDER, || self.transport.post(&body)).await?;
        let reply: ChatResponse = response.json().await?;

        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AiError::Llm("Empty choices in completion response".to_string()))?;

        Ok(CompletionResponse {
            content: choice.message.content,
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(ToolCall::from)
                .collect(),
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map_or(FinishReason::Stop, FinishReason::from_openai),
            usage: reply.usage.map(TokenUsage::from),
        })
    }

    /// Retries only cover the connection; once bytes flow, an error ends the stream.
    fn complete_stream(&self, request: CompletionRequest) -> StreamResult {
        let transport = self.transport.clone();
        let retry = self.retry.clone();
        let body = self.build_body(&request, true);

        Box::pin(async_stream::stream! {
            let body = match body {
                Ok(body) => body,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let response = match with_retry(&retry, PROVIDER, || transport.post(&body)).await {
                Ok(response) => response,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut bytes = response.bytes_stream();
            let mut lines = SseLineBuffer::default();
            let mut decoder = StreamDecoder::default();

            while let Some(next) = bytes.next().await {
                let bytes = match next {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(AiError::Llm(format!("Stream interrupted: {}", e)));
                        return;
                    }
                };
                for data in lines.push(&bytes) {
                    for chunk in decoder.decode(&data) {
                        yield Ok(chunk);
                    }
                }
            }

            if let Some(data) = lines.finish() {
                for chunk in decoder.decode(&data) {
                    yield Ok(chunk);
                }
            }
        })
    }
}
