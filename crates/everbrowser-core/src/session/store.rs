//! Session registry keyed by the caller-supplied session id.

use std::sync::Arc;

use dashmap::DashMap;
use everbrowser_ai::Turn;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use super::Conversation;

struct SessionEntry {
    history: Mutex<Conversation>,
    lock: Arc<AsyncMutex<()>>,
    stop: Mutex<CancellationToken>,
}

impl SessionEntry {
    fn new(max_turns: usize) -> Self {
        Self {
            history: Mutex::new(Conversation::new(max_turns)),
            lock: Arc::new(AsyncMutex::new(())),
            stop: Mutex::new(CancellationToken::new()),
        }
    }
}

/// Exclusive access to one session, released on drop.
pub struct SessionGuard {
    session_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// Concurrency-safe registry of conversations, locks and stop tokens.
///
/// History mutation goes only through `append`, `seed_if_empty` and `clear`.
/// Entries are created lazily and live for the life of the process.
pub struct SessionStore {
    sessions: DashMap<String, Arc<SessionEntry>>,
    max_turns: usize,
    system_prompt: Option<String>,
}

impl SessionStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_turns,
            system_prompt: None,
        }
    }

    /// Seed this prompt whenever a turn is appended to an empty history.
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    fn entry(&self, session_id: &str) -> Arc<SessionEntry> {
        if let Some(entry) = self.sessions.get(session_id) {
            return entry.clone();
        }
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(SessionEntry::new(self.max_turns)))
            .clone()
    }

    pub fn get_or_create_history(&self, session_id: &str) -> Vec<Turn> {
        self.entry(session_id).history.lock().turns()
    }

    /// Read-only view; unknown sessions read as empty and are not created.
    pub fn read_history(&self, session_id: &str) -> Vec<Turn> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.history.lock().turns())
            .unwrap_or_default()
    }

    /// Append a turn. An empty history gets the system turn first, so a
    /// `clear` racing a running request cannot leave a history without it.
    pub fn append(&self, session_id: &str, turn: Turn) {
        let entry = self.entry(session_id);
        let mut history = entry.history.lock();
        if let Some(prompt) = &self.system_prompt
            && !turn.is_system()
        {
            history.seed_if_empty(prompt);
        }
        history.append(turn);
    }

    pub fn seed_if_empty(&self, session_id: &str, system_prompt: &str) -> bool {
        self.entry(session_id)
            .history
            .lock()
            .seed_if_empty(system_prompt)
    }

    /// Empty the history and reset the stop flag. Idempotent.
    pub fn clear(&self, session_id: &str) {
        if let Some(entry) = self.sessions.get(session_id) {
            entry.history.lock().clear();
            *entry.stop.lock() = CancellationToken::new();
        }
    }

    /// Wait for exclusive access to the session.
    pub async fn acquire_lock(&self, session_id: &str) -> SessionGuard {
        let lock = self.entry(session_id).lock.clone();
        let guard = lock.lock_owned().await;
        SessionGuard {
            session_id: session_id.to_string(),
            _guard: guard,
        }
    }

    /// Returns false when the session does not exist.
    pub fn request_stop(&self, session_id: &str) -> bool {
        match self.sessions.get(session_id) {
            Some(entry) => {
                entry.stop.lock().cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_stop_requested(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|entry| entry.stop.lock().is_cancelled())
    }

    /// Install a fresh stop token for a new request.
    pub fn reset_stop(&self, session_id: &str) {
        *self.entry(session_id).stop.lock() = CancellationToken::new();
    }

    /// Current stop token. Replaced by `clear` and `reset_stop`.
    pub fn stop_token(&self, session_id: &str) -> CancellationToken {
        self.entry(session_id).stop.lock().clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.sessions.len())
            .field("max_turns", &self.max_turns)
            .finish()
    }
}
