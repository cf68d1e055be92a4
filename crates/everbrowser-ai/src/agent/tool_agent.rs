//! Tool-calling agent: streams model output and runs tool rounds until the
//! model answers without requesting a tool.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use crate::agent::accumulator::ToolCallAccumulator;
use crate::agent::capability::{AgentCapability, RawUnit, RawUnitStream, Turn};
use crate::error::{AiError, Result};
use crate::llm::{CompletionRequest, LlmClient, Message};
use crate::tools::{ToolOutput, ToolRegistry};

/// Upper bound on tool rounds inside a single streamed turn
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 25;

pub struct ToolAgent {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    max_tool_rounds: usize,
    temperature: Option<f32>,
}

impl ToolAgent {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            llm,
            tools,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            temperature: None,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn request(&self, messages: Vec<Message>) -> CompletionRequest {
        let request = CompletionRequest::new(messages);
        match self.temperature {
            Some(temperature) => request.with_temperature(temperature),
            None => request,
        }
    }
}

#[async_trait]
impl AgentCapability for ToolAgent {
    fn stream_turn(&self, history: Vec<Turn>) -> RawUnitStream {
        let llm = self.llm.clone();
        let tools = self.tools.clone();
        let max_rounds = self.max_tool_rounds;
        let schemas = tools.schemas();
        let base = self.request(history.iter().map(Message::from).collect());

        Box::pin(async_stream::stream! {
            let mut messages = base.messages.clone();
            let mut rounds = 0usize;

            loop {
                let request = CompletionRequest {
                    messages: messages.clone(),
                    tools: schemas.clone(),
                    ..base.clone()
                };
                let mut chunks = llm.complete_stream(request);
                let mut accumulator = ToolCallAccumulator::new();
                let mut text = String::new();

                while let Some(chunk) = chunks.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    };
                    if !chunk.text.is_empty() {
                        text.push_str(&chunk.text);
                        yield Ok(RawUnit::text(chunk.text));
                    }
                    if let Some(delta) = &chunk.tool_call_delta {
                        accumulator.accumulate(delta);
                    }
                }

                if accumulator.is_empty() {
                    return;
                }

                rounds += 1;
                if rounds > max_rounds {
                    yield Err(AiError::MaxIterations(max_rounds));
                    return;
                }

                let calls = accumulator.finalize();
                let preface = (!text.is_empty()).then_some(text);
                messages.push(Message::assistant_with_tool_calls(preface, calls.clone()));

                for call in calls {
                    yield Ok(RawUnit::tool_call(call.clone().into()));

                    tracing::debug!(tool = %call.name, round = rounds, "Executing tool");
                    let output = match tools.execute(&call.name, call.arguments.clone()).await {
                        Ok(output) => output,
                        Err(e) => {
                            tracing::warn!(tool = %call.name, error = %e, "Tool execution failed");
                            ToolOutput::error(e.to_string())
                        }
                    };
                    let rendered = output.render();

                    // Tool echo; the orchestrator keeps it out of the visible answer
                    yield Ok(RawUnit::text(rendered.clone()));
                    messages.push(Message::tool_result(call.id, rendered));
                }
            }
        })
    }

    async fn invoke_turn(&self, history: Vec<Turn>) -> Result<String> {
        let request = self.request(history.iter().map(Message::from).collect());
        let response = self.llm.complete(request).await?;
        Ok(response.content.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use serde_json::json;

    use super::*;
    use crate::llm::{MockLlmClient, MockStep, Role};
    use crate::tools::{Tool, ToolOutput, ToolSchema};
    use serde_json::Value;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::new("echo", "Echo the input back", json!({"type": "object"}))
        }

        async fn execute(&self, input: Value) -> Result<ToolOutput> {
            Ok(ToolOutput::success(json!(format!("echo:{}", input["text"]))))
        }
    }

    fn agent_with(steps: Vec<MockStep>) -> (ToolAgent, MockLlmClient) {
        let llm = MockLlmClient::from_steps("mock", steps);
        let tools = ToolRegistry::new().with_tool(EchoTool);
        (
            ToolAgent::new(Arc::new(llm.clone()), Arc::new(tools)),
            llm,
        )
    }

    #[tokio::test]
    async fn test_plain_answer_streams_text_units() {
        let (agent, _) = agent_with(vec![MockStep::text_pieces(["Hel", "lo"])]);
        let units: Vec<RawUnit> = agent
            .stream_turn(vec![Turn::user("hi")])
            .try_collect()
            .await
            .unwrap();
        assert_eq!(units, vec![RawUnit::text("Hel"), RawUnit::text("lo")]);
    }

    #[tokio::test]
    async fn test_tool_round_emits_call_then_echo_then_answer() {
        let (agent, llm) = agent_with(vec![
            MockStep::tool_call("call_1", "echo", json!({"text": "x"})).with_preface("Opening "),
            MockStep::text("the page."),
        ]);

        let units: Vec<RawUnit> = agent
            .stream_turn(vec![Turn::system("rules"), Turn::user("open it")])
            .try_collect()
            .await
            .unwrap();

        assert_eq!(units.len(), 4);
        assert_eq!(units[0], RawUnit::text("Opening "));
        assert!(matches!(&units[1], RawUnit::ToolCallDelta { call, .. } if call.name == "echo"));
        assert_eq!(units[2], RawUnit::text("echo:\"x\""));
        assert_eq!(units[3], RawUnit::text("the page."));

        let requests = llm.requests().await;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.len(), 1);
        let followup = &requests[1].messages;
        assert_eq!(followup[0].role, Role::System);
        assert_eq!(followup[2].role, Role::Assistant);
        assert_eq!(followup[3].role, Role::Tool);
        assert_eq!(followup[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_output() {
        let (agent, _) = agent_with(vec![
            MockStep::tool_call("call_1", "missing", json!({})),
            MockStep::text("sorry"),
        ]);
        let units: Vec<RawUnit> = agent
            .stream_turn(vec![Turn::user("go")])
            .try_collect()
            .await
            .unwrap();
        assert!(units[1].content().contains("Tool not found"));
        assert_eq!(units[2], RawUnit::text("sorry"));
    }

    #[tokio::test]
    async fn test_tool_round_limit() {
        let (agent, _) = agent_with(vec![
            MockStep::tool_call("a", "echo", json!({})),
            MockStep::tool_call("b", "echo", json!({})),
        ]);
        let agent = agent.with_max_tool_rounds(1);
        let result: Result<Vec<RawUnit>> =
            agent.stream_turn(vec![Turn::user("loop")]).try_collect().await;
        assert!(matches!(result, Err(AiError::MaxIterations(1))));
    }

    #[tokio::test]
    async fn test_llm_error_ends_stream_with_error() {
        let (agent, _) = agent_with(vec![MockStep::error("connection reset")]);
        let result: Result<Vec<RawUnit>> =
            agent.stream_turn(vec![Turn::user("hi")]).try_collect().await;
        assert!(matches!(result, Err(AiError::Llm(_))));
    }

    #[tokio::test]
    async fn test_invoke_turn_sends_no_tools() {
        let (agent, llm) = agent_with(vec![MockStep::text("COMPLETED")]);
        let answer = agent.invoke_turn(vec![Turn::user("status?")]).await.unwrap();
        assert_eq!(answer, "COMPLETED");
        assert!(llm.requests().await[0].tools.is_empty());
    }
}
