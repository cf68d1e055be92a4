//! Continuation controller: the per-request turn loop.
//!
//! Start -> Streaming -> Judging -> (Continuing -> Streaming | End).
//! Failed attempts go through the retry governor and re-enter Streaming.

use everbrowser_ai::{AgentCapability, AiError, Turn};
use futures::StreamExt;

use super::RequestOutcome;
use super::retry::{RetryDecision, RetryGovernor};
use crate::config::OrchestratorConfig;
use crate::events::{ChatEvent, EventSink};
use crate::judge::{CompletionJudge, TaskStatus};
use crate::normalizer::{Fragment, TokenNormalizer};
use crate::session::SessionStore;

/// How one streaming attempt ended
enum Attempt {
    Finished,
    Failed(AiError),
    Stopped,
    Disconnected,
}

pub(super) struct TurnLoop<'a> {
    pub store: &'a SessionStore,
    pub judge: &'a CompletionJudge,
    pub agent: &'a dyn AgentCapability,
    pub config: &'a OrchestratorConfig,
    pub sink: &'a dyn EventSink,
    pub session_id: &'a str,
}

impl TurnLoop<'_> {
    /// Drive one request to its end. The caller holds the session lock.
    pub(super) async fn run(&self, message: &str) -> RequestOutcome {
        // The client may have gone away while this request waited for the lock
        if !self.sink.is_connected() {
            tracing::info!(session_id = self.session_id, "Client gone before start");
            return RequestOutcome::Disconnected;
        }

        self.store
            .seed_if_empty(self.session_id, &self.config.system_prompt);
        self.store.append(self.session_id, Turn::user(message));
        self.sink.emit(ChatEvent::Start).await;

        let outcome = self.drive().await;

        match &outcome {
            RequestOutcome::Failed(_) | RequestOutcome::Disconnected => {}
            _ => {
                if self.sink.is_connected() {
                    self.sink.emit(ChatEvent::End).await;
                }
            }
        }
        outcome
    }

    async fn drive(&self) -> RequestOutcome {
        let mut governor = RetryGovernor::new(
            self.store,
            self.session_id,
            &self.config.continue_prompt,
            self.config.max_consecutive_errors,
        );
        let mut continuations = 0u32;

        loop {
            // History may have been cleared by a concurrent clear call
            self.store
                .seed_if_empty(self.session_id, &self.config.system_prompt);

            let mut text = String::new();
            match self.stream_attempt(&mut text).await {
                Attempt::Stopped => {
                    self.keep_partial(&text);
                    tracing::info!(session_id = self.session_id, "Stopped by request");
                    return RequestOutcome::Stopped;
                }
                Attempt::Disconnected => {
                    self.keep_partial(&text);
                    tracing::info!(session_id = self.session_id, "Client disconnected");
                    return RequestOutcome::Disconnected;
                }
                Attempt::Failed(error) => match governor.record_failure(&text, &error) {
                    RetryDecision::Retry { .. } => continue,
                    RetryDecision::Exhausted => {
                        let message = format!(
                            "Agent failed {} times in a row: {}",
                            governor.consecutive_errors(),
                            error
                        );
                        self.sink.emit(ChatEvent::error(message.clone())).await;
                        return RequestOutcome::Failed(message);
                    }
                },
                Attempt::Finished => governor.record_success(),
            }

            if self.store.is_stop_requested(self.session_id) {
                self.keep_partial(&text);
                return RequestOutcome::Stopped;
            }
            if text.trim().is_empty() {
                tracing::debug!(session_id = self.session_id, "Turn produced no visible text");
                return RequestOutcome::EmptyTurn;
            }

            // Judging
            self.store
                .append(self.session_id, Turn::assistant(text.trim().to_string()));
            match self.judge.classify(self.agent, self.session_id).await {
                TaskStatus::Completed => return RequestOutcome::Completed,
                TaskStatus::UserActionRequired => return RequestOutcome::UserActionRequired,
                TaskStatus::Continue => {
                    if self.store.is_stop_requested(self.session_id) {
                        tracing::info!(
                            session_id = self.session_id,
                            "Stopped during completion check"
                        );
                        return RequestOutcome::Stopped;
                    }
                    if continuations >= self.config.max_auto_continuations {
                        tracing::info!(
                            session_id = self.session_id,
                            continuations,
                            "Auto-continuation limit reached"
                        );
                        return RequestOutcome::ContinuationLimit;
                    }
                    continuations += 1;
                    tracing::debug!(
                        session_id = self.session_id,
                        continuations,
                        "Task in progress, continuing"
                    );
                    self.store.append(
                        self.session_id,
                        Turn::user(self.config.continue_prompt.clone()),
                    );
                }
            }
        }
    }

    /// Stream one agent turn to the sink, accumulating the visible text.
    async fn stream_attempt(&self, text: &mut String) -> Attempt {
        let history = self.store.get_or_create_history(self.session_id);
        let mut units = self.agent.stream_turn(history);
        let mut normalizer = TokenNormalizer::new();

        loop {
            if let Some(interrupted) = self.interrupted() {
                return interrupted;
            }

            let unit = match units.next().await {
                None => return Attempt::Finished,
                Some(Err(e)) => return Attempt::Failed(e),
                Some(Ok(unit)) => unit,
            };

            // A stop may have landed while waiting on the agent
            if let Some(interrupted) = self.interrupted() {
                return interrupted;
            }

            let event = match normalizer.push(&unit) {
                Some(Fragment::Text(fragment)) => {
                    text.push_str(&fragment);
                    ChatEvent::Token { content: fragment }
                }
                Some(Fragment::ToolSuppressed { tool }) => {
                    tracing::debug!(session_id = self.session_id, tool = %tool, "Tool call");
                    ChatEvent::ToolInternalSuppressed { tool }
                }
                None => continue,
            };
            if !self.sink.emit(event).await {
                return Attempt::Disconnected;
            }
        }
    }

    fn interrupted(&self) -> Option<Attempt> {
        if self.store.is_stop_requested(self.session_id) {
            Some(Attempt::Stopped)
        } else if !self.sink.is_connected() {
            Some(Attempt::Disconnected)
        } else {
            None
        }
    }

    fn keep_partial(&self, text: &str) {
        let partial = text.trim();
        if !partial.is_empty() {
            self.store
                .append(self.session_id, Turn::assistant(partial.to_string()));
        }
    }
}
