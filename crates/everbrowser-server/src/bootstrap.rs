//! Agent start-up: build the model client and tools, warm up, mark ready.

use crate::config::ServerConfig;
use everbrowser_ai::{
    AgentCapability, LlmClient, OpenAIClient, PageFetchTool, ToolAgent, ToolRegistry, Turn,
};
use everbrowser_core::AgentSlot;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub fn build_agent(config: &ServerConfig) -> ToolAgent {
    let llm: Arc<dyn LlmClient> = Arc::new(
        OpenAIClient::new(config.model.api_key.clone())
            .with_model(config.model.name.clone())
            .with_base_url(config.model.base_url.clone()),
    );

    let tools = ToolRegistry::new()
        .with_tool(PageFetchTool::new().with_max_text_bytes(config.agent.page_text_bytes));

    let agent = ToolAgent::new(llm, Arc::new(tools))
        .with_max_tool_rounds(config.agent.max_tool_rounds);
    match config.model.temperature {
        Some(temperature) => agent.with_temperature(temperature),
        None => agent,
    }
}

/// Run one full agent turn and discard its output. Any failure is returned.
pub async fn warm_up(
    agent: &dyn AgentCapability,
    system_prompt: &str,
    prompt: &str,
) -> anyhow::Result<()> {
    let mut units = agent.stream_turn(vec![Turn::system(system_prompt), Turn::user(prompt)]);
    let mut count = 0usize;
    while let Some(unit) = units.next().await {
        unit?;
        count += 1;
    }
    tracing::debug!(units = count, "Warm-up turn finished");
    Ok(())
}

/// Initialize the agent in the background and install it into `slot`.
///
/// Requests arriving before this finishes get an "agent not ready" error.
/// On failure the agent stays not ready.
pub fn spawn_bootstrap(config: ServerConfig, slot: AgentSlot) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            model = %config.model.name,
            base_url = %config.model.base_url,
            "Initializing agent"
        );
        let agent: Arc<dyn AgentCapability> = Arc::new(build_agent(&config));

        if let Some(prompt) = &config.agent.warmup_prompt
            && let Err(e) = warm_up(agent.as_ref(), &config.orchestrator.system_prompt, prompt).await
        {
            tracing::error!(error = %e, "Agent warm-up failed, agent stays unavailable");
            return;
        }

        slot.install(agent);
        tracing::info!("Agent ready");
    })
}
