//! Streaming session orchestrator
//!
//! Entry point for the control operations the transport exposes: post a
//! message, stop, clear and read history. Each posted message runs under the
//! session's lock, so turns for one session never interleave.

mod controller;
mod retry;

use std::sync::Arc;

use everbrowser_ai::{AgentCapability, Turn};
use once_cell::sync::OnceCell;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::{CoreError, Result};
use crate::events::{ChatEvent, EventSink};
use crate::judge::CompletionJudge;
use crate::session::SessionStore;

use controller::TurnLoop;
pub use retry::{RetryDecision, RetryGovernor};

/// How a posted message ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Completed,
    UserActionRequired,
    /// Judge kept asking to continue past the auto-continuation ceiling
    ContinuationLimit,
    /// A turn finished without visible text
    EmptyTurn,
    Stopped,
    Disconnected,
    /// Consecutive failure ceiling reached
    Failed(String),
    /// No agent installed yet
    NotReady,
}

/// Holder for the process-wide agent, installed once it has initialized.
#[derive(Clone, Default)]
pub struct AgentSlot {
    inner: Arc<OnceCell<Arc<dyn AgentCapability>>>,
}

impl AgentSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready(agent: Arc<dyn AgentCapability>) -> Self {
        let slot = Self::new();
        slot.install(agent);
        slot
    }

    /// Returns false if an agent was already installed.
    pub fn install(&self, agent: Arc<dyn AgentCapability>) -> bool {
        self.inner.set(agent).is_ok()
    }

    pub fn get(&self) -> Option<Arc<dyn AgentCapability>> {
        self.inner.get().cloned()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.get().is_some()
    }
}

impl std::fmt::Debug for AgentSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSlot")
            .field("ready", &self.is_ready())
            .finish()
    }
}

pub struct Orchestrator {
    store: Arc<SessionStore>,
    judge: CompletionJudge,
    agent: AgentSlot,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, agent: AgentSlot) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(
            SessionStore::new(config.max_history_turns)
                .with_system_prompt(config.system_prompt.clone()),
        );
        let judge = CompletionJudge::new(store.clone(), config.judge_prompt.clone());
        Ok(Self {
            store,
            judge,
            agent,
            config,
        })
    }

    pub fn agent_slot(&self) -> &AgentSlot {
        &self.agent
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run the turn loop for one user message, streaming events to `sink`.
    ///
    /// Waits for any request already running on the same session.
    pub async fn post_message(
        &self,
        session_id: &str,
        message: &str,
        sink: &dyn EventSink,
    ) -> RequestOutcome {
        let Some(agent) = self.agent.get() else {
            tracing::warn!(session_id, "Message rejected, agent not ready");
            sink.emit(ChatEvent::error(CoreError::AgentNotReady.to_string()))
                .await;
            return RequestOutcome::NotReady;
        };

        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("chat_request", session_id, %request_id);

        async {
            let _guard = self.store.acquire_lock(session_id).await;
            self.store.reset_stop(session_id);
            tracing::debug!("Session lock acquired");

            let turn_loop = TurnLoop {
                store: &self.store,
                judge: &self.judge,
                agent: agent.as_ref(),
                config: &self.config,
                sink,
                session_id,
            };
            let outcome = turn_loop.run(message).await;
            tracing::info!(?outcome, "Request finished");
            outcome
        }
        .instrument(span)
        .await
    }

    /// Ask the running request on this session to stop at its next check.
    pub fn request_stop(&self, session_id: &str) -> bool {
        tracing::info!(session_id, "Stop requested");
        self.store.request_stop(session_id)
    }

    pub fn clear_history(&self, session_id: &str) {
        tracing::info!(session_id, "History cleared");
        self.store.clear(session_id);
    }

    pub fn read_history(&self, session_id: &str) -> Vec<Turn> {
        self.store.read_history(session_id)
    }
}
