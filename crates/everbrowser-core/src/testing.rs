//! Scripted agent capability for deterministic orchestrator tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use everbrowser_ai::{
    AgentCapability, AiError, RawUnit, RawUnitStream, Result, ToolInvocation, Turn,
};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub enum ScriptedUnit {
    Text(String),
    /// Tool call announcement followed by its echoed output
    Tool { name: String, echo: String },
    /// Fail the turn at this point
    Fail(String),
}

/// Raw output of one scripted `stream_turn` call.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    units: Vec<ScriptedUnit>,
    unit_delay: Duration,
}

impl ScriptedTurn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        texts.into_iter().fold(Self::new(), |turn, t| turn.text(t))
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.units.push(ScriptedUnit::Text(text.into()));
        self
    }

    pub fn tool(mut self, name: impl Into<String>, echo: impl Into<String>) -> Self {
        self.units.push(ScriptedUnit::Tool {
            name: name.into(),
            echo: echo.into(),
        });
        self
    }

    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.units.push(ScriptedUnit::Fail(message.into()));
        self
    }

    pub fn with_unit_delay(mut self, delay: Duration) -> Self {
        self.unit_delay = delay;
        self
    }
}

#[derive(Debug, Clone)]
enum Verdict {
    Answer(String),
    Fail,
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Agent that replays scripted turns and completion verdicts.
///
/// Turns are consumed in order, then `default_turn` repeats (an empty turn if
/// unset). Verdicts work the same way, defaulting to `COMPLETED`.
#[derive(Default)]
pub struct ScriptedAgent {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    default_turn: Option<ScriptedTurn>,
    verdicts: Mutex<VecDeque<Verdict>>,
    default_verdict: Option<Verdict>,
    streamed: Mutex<Vec<Vec<Turn>>>,
    invoked: Mutex<Vec<Vec<Turn>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_turns(self, turns: impl IntoIterator<Item = ScriptedTurn>) -> Self {
        self.turns.lock().extend(turns);
        self
    }

    pub fn with_default_turn(mut self, turn: ScriptedTurn) -> Self {
        self.default_turn = Some(turn);
        self
    }

    pub fn with_verdicts<I, S>(self, verdicts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.verdicts
            .lock()
            .extend(verdicts.into_iter().map(|v| Verdict::Answer(v.into())));
        self
    }

    pub fn with_default_verdict(mut self, verdict: impl Into<String>) -> Self {
        self.default_verdict = Some(Verdict::Answer(verdict.into()));
        self
    }

    /// Every `invoke_turn` call fails.
    pub fn with_failing_verdicts(mut self) -> Self {
        self.default_verdict = Some(Verdict::Fail);
        self
    }

    /// Histories passed to `stream_turn`, oldest first.
    pub fn streamed_histories(&self) -> Vec<Vec<Turn>> {
        self.streamed.lock().clone()
    }

    /// Histories passed to `invoke_turn`, oldest first.
    pub fn invoked_histories(&self) -> Vec<Vec<Turn>> {
        self.invoked.lock().clone()
    }

    pub fn stream_count(&self) -> usize {
        self.streamed.lock().len()
    }

    /// Highest number of turns that were streaming at the same time.
    pub fn max_concurrent_streams(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentCapability for ScriptedAgent {
    fn stream_turn(&self, history: Vec<Turn>) -> RawUnitStream {
        self.streamed.lock().push(history);
        let turn = self
            .turns
            .lock()
            .pop_front()
            .or_else(|| self.default_turn.clone())
            .unwrap_or_default();
        let active = self.active.clone();
        let max_active = self.max_active.clone();

        Box::pin(async_stream::stream! {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            max_active.fetch_max(now, Ordering::SeqCst);
            let _guard = ActiveGuard(active);

            for (index, unit) in turn.units.into_iter().enumerate() {
                if !turn.unit_delay.is_zero() {
                    tokio::time::sleep(turn.unit_delay).await;
                }
                match unit {
                    ScriptedUnit::Text(text) => {
                        yield Ok(RawUnit::text(text));
                    }
                    ScriptedUnit::Tool { name, echo } => {
                        yield Ok(RawUnit::tool_call(ToolInvocation {
                            id: format!("call_{}", index),
                            name,
                            arguments: serde_json::json!({}),
                        }));
                        yield Ok(RawUnit::text(echo));
                    }
                    ScriptedUnit::Fail(message) => {
                        yield Err(AiError::Llm(message));
                        return;
                    }
                }
            }
        })
    }

    async fn invoke_turn(&self, history: Vec<Turn>) -> Result<String> {
        self.invoked.lock().push(history);
        let verdict = self
            .verdicts
            .lock()
            .pop_front()
            .or_else(|| self.default_verdict.clone())
            .unwrap_or_else(|| Verdict::Answer("COMPLETED".to_string()));
        match verdict {
            Verdict::Answer(answer) => Ok(answer),
            Verdict::Fail => Err(AiError::Llm("verdict unavailable".to_string())),
        }
    }
}
