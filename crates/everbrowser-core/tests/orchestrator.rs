//! End-to-end behaviour of the turn loop against a scripted agent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use everbrowser_ai::{AgentCapability, RawUnitStream, Turn, TurnRole};
use everbrowser_core::testing::{ScriptedAgent, ScriptedTurn};
use everbrowser_core::{
    AgentSlot, ChannelSink, ChatEvent, EventSink, Orchestrator, OrchestratorConfig,
    RequestOutcome, SessionStore,
};
use parking_lot::Mutex;

enum OnToken {
    Nothing,
    Stop(Arc<SessionStore>, String),
    Clear(Arc<SessionStore>, String),
    Disconnect,
}

struct RecordingSink {
    events: Mutex<Vec<ChatEvent>>,
    connected: AtomicBool,
    on_token: OnToken,
}

impl RecordingSink {
    fn new() -> Self {
        Self::with(OnToken::Nothing)
    }

    fn with(on_token: OnToken) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            on_token,
        }
    }

    fn disconnected() -> Self {
        let sink = Self::new();
        sink.connected.store(false, Ordering::SeqCst);
        sink
    }

    fn events(&self) -> Vec<ChatEvent> {
        self.events.lock().clone()
    }

    fn tokens(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ChatEvent::Token { content } => Some(content),
                _ => None,
            })
            .collect()
    }

    fn count(&self, wanted: &ChatEvent) -> usize {
        self.events().iter().filter(|e| *e == wanted).count()
    }

    fn errors(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ChatEvent::Error { .. }))
            .count()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event: ChatEvent) -> bool {
        if !self.is_connected() {
            return false;
        }
        let is_token = matches!(event, ChatEvent::Token { .. });
        self.events.lock().push(event);
        if is_token {
            match &self.on_token {
                OnToken::Nothing => {}
                OnToken::Stop(store, session_id) => {
                    store.request_stop(session_id);
                }
                OnToken::Clear(store, session_id) => store.clear(session_id),
                OnToken::Disconnect => self.connected.store(false, Ordering::SeqCst),
            }
        }
        true
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

fn setup(agent: ScriptedAgent, config: OrchestratorConfig) -> (Orchestrator, Arc<ScriptedAgent>) {
    let agent = Arc::new(agent);
    let orchestrator = Orchestrator::new(config, AgentSlot::ready(agent.clone())).unwrap();
    (orchestrator, agent)
}

fn contents(orchestrator: &Orchestrator, session_id: &str) -> Vec<String> {
    orchestrator
        .read_history(session_id)
        .into_iter()
        .map(|t| t.content)
        .collect()
}

#[tokio::test]
async fn open_page_scenario_streams_visible_text_once() {
    let agent = ScriptedAgent::new()
        .with_turns([ScriptedTurn::new()
            .text("Opening ")
            .tool("browser_open", "done")
            .text("the page.")])
        .with_verdicts(["COMPLETED"]);
    let (orchestrator, agent) = setup(agent, OrchestratorConfig::default());
    let sink = RecordingSink::new();

    let outcome = orchestrator
        .post_message("s1", "open example.com", &sink)
        .await;

    assert_eq!(outcome, RequestOutcome::Completed);
    assert_eq!(sink.tokens().concat(), "Opening the page.");
    assert_eq!(sink.events().first(), Some(&ChatEvent::Start));
    assert_eq!(sink.events().last(), Some(&ChatEvent::End));
    assert_eq!(sink.count(&ChatEvent::End), 1);
    assert_eq!(
        sink.count(&ChatEvent::ToolInternalSuppressed {
            tool: "browser_open".to_string()
        }),
        1
    );
    assert_eq!(sink.errors(), 0);
    assert_eq!(agent.stream_count(), 1);

    let history = orchestrator.read_history("s1");
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].role, TurnRole::System);
    assert_eq!(history[1].content, "open example.com");
    assert_eq!(history[2].role, TurnRole::Assistant);
    assert_eq!(history[2].content, "Opening the page.");
}

#[tokio::test]
async fn same_session_requests_are_serialized() {
    let agent = ScriptedAgent::new().with_default_turn(
        ScriptedTurn::from_texts(["part one, ", "part two"])
            .with_unit_delay(Duration::from_millis(20)),
    );
    let (orchestrator, agent) = setup(agent, OrchestratorConfig::default());
    let orchestrator = Arc::new(orchestrator);

    let handles: Vec<_> = ["first", "second"]
        .into_iter()
        .map(|message| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                let sink = RecordingSink::new();
                orchestrator.post_message("shared", message, &sink).await
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), RequestOutcome::Completed);
    }

    assert_eq!(agent.max_concurrent_streams(), 1);
    let roles: Vec<TurnRole> = orchestrator
        .read_history("shared")
        .into_iter()
        .map(|t| t.role)
        .collect();
    assert_eq!(
        roles,
        vec![
            TurnRole::System,
            TurnRole::User,
            TurnRole::Assistant,
            TurnRole::User,
            TurnRole::Assistant
        ]
    );
}

#[tokio::test]
async fn different_sessions_run_concurrently() {
    let agent = ScriptedAgent::new().with_default_turn(
        ScriptedTurn::from_texts(["a", "b", "c"]).with_unit_delay(Duration::from_millis(30)),
    );
    let (orchestrator, agent) = setup(agent, OrchestratorConfig::default());
    let orchestrator = Arc::new(orchestrator);

    let handles: Vec<_> = ["s1", "s2"]
        .into_iter()
        .map(|session_id| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                let sink = RecordingSink::new();
                orchestrator.post_message(session_id, "go", &sink).await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(agent.max_concurrent_streams(), 2);
}

#[tokio::test]
async fn history_cap_keeps_system_turn_first() {
    let agent = ScriptedAgent::new().with_default_turn(ScriptedTurn::from_texts(["ok"]));
    let config = OrchestratorConfig {
        max_history_turns: 4,
        ..Default::default()
    };
    let (orchestrator, _) = setup(agent, config);

    for i in 0..6 {
        let sink = RecordingSink::new();
        orchestrator
            .post_message("s", &format!("message {}", i), &sink)
            .await;
        let history = orchestrator.read_history("s");
        assert!(history.len() <= 4);
        assert_eq!(history[0].role, TurnRole::System);
    }
    assert_eq!(
        contents(&orchestrator, "s")[1..],
        ["ok".to_string(), "message 5".to_string(), "ok".to_string()]
    );
}

#[tokio::test]
async fn hidden_reasoning_never_reaches_client_or_history() {
    let agent = ScriptedAgent::new()
        .with_turns([ScriptedTurn::from_texts(["<think>", "secret", "</think>answer"])]);
    let (orchestrator, _) = setup(agent, OrchestratorConfig::default());
    let sink = RecordingSink::new();

    orchestrator.post_message("s", "question", &sink).await;

    assert_eq!(sink.tokens().concat(), "answer");
    assert!(sink.tokens().iter().all(|t| !t.contains("secret")));
    assert_eq!(contents(&orchestrator, "s").last().unwrap(), "answer");
}

#[tokio::test]
async fn continuation_ceiling_ends_without_error() {
    let agent = ScriptedAgent::new()
        .with_default_turn(ScriptedTurn::from_texts(["working"]))
        .with_default_verdict("CONTINUE");
    let config = OrchestratorConfig {
        max_auto_continuations: 3,
        ..Default::default()
    };
    let (orchestrator, agent) = setup(agent, config);
    let sink = RecordingSink::new();

    let outcome = orchestrator.post_message("s", "long task", &sink).await;

    assert_eq!(outcome, RequestOutcome::ContinuationLimit);
    assert_eq!(agent.stream_count(), 4);
    assert_eq!(sink.errors(), 0);
    assert_eq!(sink.events().last(), Some(&ChatEvent::End));
    let continues = contents(&orchestrator, "s")
        .iter()
        .filter(|c| *c == "continue")
        .count();
    assert_eq!(continues, 3);
}

#[tokio::test]
async fn continue_then_complete() {
    let agent = ScriptedAgent::new()
        .with_turns([
            ScriptedTurn::from_texts(["step 1"]),
            ScriptedTurn::from_texts(["step 2"]),
        ])
        .with_verdicts(["CONTINUE", "COMPLETED"]);
    let (orchestrator, agent) = setup(agent, OrchestratorConfig::default());
    let sink = RecordingSink::new();

    let outcome = orchestrator.post_message("s", "task", &sink).await;

    assert_eq!(outcome, RequestOutcome::Completed);
    assert_eq!(agent.stream_count(), 2);
    assert_eq!(
        contents(&orchestrator, "s")[1..],
        ["task", "step 1", "continue", "step 2"]
    );
    // Second attempt saw the first answer and the continue turn
    assert_eq!(agent.streamed_histories()[1].len(), 4);
}

#[tokio::test]
async fn user_action_required_stops_the_loop() {
    let agent = ScriptedAgent::new()
        .with_default_turn(ScriptedTurn::from_texts(["Please log in first."]))
        .with_verdicts(["USER_ACTION_REQUIRED"]);
    let (orchestrator, agent) = setup(agent, OrchestratorConfig::default());
    let sink = RecordingSink::new();

    let outcome = orchestrator.post_message("s", "check my inbox", &sink).await;

    assert_eq!(outcome, RequestOutcome::UserActionRequired);
    assert_eq!(agent.stream_count(), 1);
    assert_eq!(sink.events().last(), Some(&ChatEvent::End));
}

#[tokio::test]
async fn error_ceiling_emits_terminal_error_and_keeps_partials() {
    let agent = ScriptedAgent::new()
        .with_default_turn(ScriptedTurn::new().text("partial").fail("connection reset"));
    let config = OrchestratorConfig {
        max_consecutive_errors: 3,
        ..Default::default()
    };
    let (orchestrator, agent) = setup(agent, config);
    let sink = RecordingSink::new();

    let outcome = orchestrator.post_message("s", "flaky", &sink).await;

    assert!(matches!(outcome, RequestOutcome::Failed(_)));
    assert_eq!(agent.stream_count(), 3);
    assert_eq!(sink.errors(), 1);
    assert!(matches!(sink.events().last(), Some(ChatEvent::Error { .. })));
    assert_eq!(sink.count(&ChatEvent::End), 0);
    assert!(agent.invoked_histories().is_empty());

    let history = orchestrator.read_history("s");
    let partials = history
        .iter()
        .filter(|t| t.role == TurnRole::Assistant && t.content == "partial")
        .count();
    assert_eq!(partials, 3);
}

#[tokio::test]
async fn transient_failure_recovers_and_preserves_partial() {
    let agent = ScriptedAgent::new()
        .with_turns([
            ScriptedTurn::new().text("Half").fail("timeout"),
            ScriptedTurn::from_texts(["done"]),
        ])
        .with_verdicts(["COMPLETED"]);
    let (orchestrator, _) = setup(agent, OrchestratorConfig::default());
    let sink = RecordingSink::new();

    let outcome = orchestrator.post_message("s", "go", &sink).await;

    assert_eq!(outcome, RequestOutcome::Completed);
    assert_eq!(sink.errors(), 0);
    assert_eq!(
        contents(&orchestrator, "s")[1..],
        ["go", "Half", "continue", "done"]
    );
}

#[tokio::test]
async fn stop_between_units_ends_quietly() {
    let agent = ScriptedAgent::new()
        .with_default_turn(ScriptedTurn::from_texts(["one", " two", " three"]));
    let (orchestrator, agent) = setup(agent, OrchestratorConfig::default());
    let sink = RecordingSink::with(OnToken::Stop(
        orchestrator.store().clone(),
        "s".to_string(),
    ));

    let outcome = orchestrator.post_message("s", "count", &sink).await;

    assert_eq!(outcome, RequestOutcome::Stopped);
    assert_eq!(sink.tokens(), vec!["one".to_string()]);
    assert_eq!(sink.errors(), 0);
    assert_eq!(sink.events().last(), Some(&ChatEvent::End));
    assert!(agent.invoked_histories().is_empty());
    assert_eq!(contents(&orchestrator, "s").last().unwrap(), "one");

    // The next request starts with a fresh stop flag
    let sink = RecordingSink::new();
    let outcome = orchestrator.post_message("s", "again", &sink).await;
    assert_eq!(outcome, RequestOutcome::Completed);
    assert_eq!(sink.tokens().concat(), "one two three");
}

#[tokio::test]
async fn disconnect_ends_without_end_event() {
    let agent = ScriptedAgent::new()
        .with_default_turn(ScriptedTurn::from_texts(["one", " two"]));
    let (orchestrator, agent) = setup(agent, OrchestratorConfig::default());
    let sink = RecordingSink::with(OnToken::Disconnect);

    let outcome = orchestrator.post_message("s", "count", &sink).await;

    assert_eq!(outcome, RequestOutcome::Disconnected);
    assert_eq!(sink.count(&ChatEvent::End), 0);
    assert_eq!(sink.errors(), 0);
    assert!(agent.invoked_histories().is_empty());
}

#[tokio::test]
async fn channel_sink_drop_is_seen_as_disconnect() {
    let agent = ScriptedAgent::new().with_default_turn(
        ScriptedTurn::from_texts(["a", "b", "c", "d"]).with_unit_delay(Duration::from_millis(20)),
    );
    let (orchestrator, _) = setup(agent, OrchestratorConfig::default());
    let orchestrator = Arc::new(orchestrator);
    let (sink, mut rx) = ChannelSink::channel(16);

    let task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.post_message("s", "go", &sink).await })
    };
    assert_eq!(rx.recv().await, Some(ChatEvent::Start));
    assert_eq!(rx.recv().await, Some(ChatEvent::token("a")));
    drop(rx);

    assert_eq!(task.await.unwrap(), RequestOutcome::Disconnected);
}

#[tokio::test]
async fn empty_turn_skips_judge() {
    let agent = ScriptedAgent::new().with_turns([ScriptedTurn::from_texts(["   ", "```"])]);
    let (orchestrator, agent) = setup(agent, OrchestratorConfig::default());
    let sink = RecordingSink::new();

    let outcome = orchestrator.post_message("s", "hello", &sink).await;

    assert_eq!(outcome, RequestOutcome::EmptyTurn);
    assert!(sink.tokens().is_empty());
    assert_eq!(sink.events().last(), Some(&ChatEvent::End));
    assert!(agent.invoked_histories().is_empty());
    assert_eq!(orchestrator.read_history("s").len(), 2);
}

#[tokio::test]
async fn agent_not_ready_is_reported_immediately() {
    let orchestrator = Orchestrator::new(OrchestratorConfig::default(), AgentSlot::new()).unwrap();
    let sink = RecordingSink::new();

    let outcome = orchestrator.post_message("s", "hello", &sink).await;

    assert_eq!(outcome, RequestOutcome::NotReady);
    assert_eq!(sink.events().len(), 1);
    assert_eq!(sink.errors(), 1);
    assert!(orchestrator.read_history("s").is_empty());
    assert_eq!(orchestrator.store().session_count(), 0);
}

#[tokio::test]
async fn clear_reseeds_system_turn_on_next_message() {
    let agent = ScriptedAgent::new().with_default_turn(ScriptedTurn::from_texts(["hi"]));
    let (orchestrator, _) = setup(agent, OrchestratorConfig::default());

    orchestrator
        .post_message("s", "first", &RecordingSink::new())
        .await;
    orchestrator.clear_history("s");
    assert!(orchestrator.read_history("s").is_empty());

    orchestrator
        .post_message("s", "second", &RecordingSink::new())
        .await;
    let history = orchestrator.read_history("s");
    assert_eq!(history.len(), 3);
    assert!(history[0].is_system());
    assert_eq!(history[1].content, "second");
}

#[tokio::test]
async fn clear_during_stream_keeps_system_turn_first() {
    let agent = ScriptedAgent::new().with_default_turn(ScriptedTurn::from_texts(["hi"]));
    let (orchestrator, agent) = setup(agent, OrchestratorConfig::default());
    let sink = RecordingSink::with(OnToken::Clear(
        orchestrator.store().clone(),
        "s".to_string(),
    ));

    orchestrator.post_message("s", "first", &sink).await;
    let history = orchestrator.read_history("s");
    assert!(history[0].is_system());
    assert_eq!(history[1].role, TurnRole::Assistant);

    orchestrator
        .post_message("s", "second", &RecordingSink::new())
        .await;
    let history = orchestrator.read_history("s");
    assert!(history[0].is_system());
    assert_eq!(history.iter().filter(|t| t.is_system()).count(), 1);
    assert_eq!(history.last().unwrap().role, TurnRole::Assistant);

    for probe in agent.invoked_histories() {
        assert!(probe[0].is_system());
    }
}

/// Raises the stop flag from inside the completion check.
struct StopWhileJudging {
    inner: Arc<ScriptedAgent>,
    store: Arc<SessionStore>,
    session_id: String,
}

#[async_trait]
impl AgentCapability for StopWhileJudging {
    fn stream_turn(&self, history: Vec<Turn>) -> RawUnitStream {
        self.inner.stream_turn(history)
    }

    async fn invoke_turn(&self, history: Vec<Turn>) -> everbrowser_ai::Result<String> {
        self.store.request_stop(&self.session_id);
        self.inner.invoke_turn(history).await
    }
}

#[tokio::test]
async fn stop_during_completion_check_skips_continue_turn() {
    let orchestrator = Orchestrator::new(OrchestratorConfig::default(), AgentSlot::new()).unwrap();
    let inner = Arc::new(
        ScriptedAgent::new()
            .with_default_turn(ScriptedTurn::from_texts(["working"]))
            .with_default_verdict("CONTINUE"),
    );
    orchestrator.agent_slot().install(Arc::new(StopWhileJudging {
        inner: inner.clone(),
        store: orchestrator.store().clone(),
        session_id: "s".to_string(),
    }));
    let sink = RecordingSink::new();

    let outcome = orchestrator.post_message("s", "go", &sink).await;

    assert_eq!(outcome, RequestOutcome::Stopped);
    assert_eq!(inner.stream_count(), 1);
    assert_eq!(sink.events().last(), Some(&ChatEvent::End));
    assert_eq!(contents(&orchestrator, "s").last().unwrap(), "working");
}

#[tokio::test]
async fn client_gone_before_start_leaves_history_untouched() {
    let agent = ScriptedAgent::new().with_default_turn(ScriptedTurn::from_texts(["hi"]));
    let (orchestrator, agent) = setup(agent, OrchestratorConfig::default());
    let sink = RecordingSink::disconnected();

    let outcome = orchestrator.post_message("s", "hello", &sink).await;

    assert_eq!(outcome, RequestOutcome::Disconnected);
    assert!(sink.events().is_empty());
    assert!(orchestrator.read_history("s").is_empty());
    assert_eq!(agent.stream_count(), 0);
}

#[test]
fn invalid_config_is_rejected() {
    let config = OrchestratorConfig {
        max_auto_continuations: 0,
        ..Default::default()
    };
    assert!(Orchestrator::new(config, AgentSlot::new()).is_err());
}
