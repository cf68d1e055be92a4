//! Bounded retry of failed turn attempts with partial output preservation.

use everbrowser_ai::{AiError, Turn};

use crate::session::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run another attempt; `attempt` is the consecutive failure count so far
    Retry { attempt: u32 },
    /// The consecutive failure ceiling was reached
    Exhausted,
}

/// Tracks consecutive failed attempts for one request.
#[derive(Debug)]
pub struct RetryGovernor<'a> {
    store: &'a SessionStore,
    session_id: &'a str,
    continue_prompt: &'a str,
    max_errors: u32,
    errors: u32,
}

impl<'a> RetryGovernor<'a> {
    pub fn new(
        store: &'a SessionStore,
        session_id: &'a str,
        continue_prompt: &'a str,
        max_errors: u32,
    ) -> Self {
        Self {
            store,
            session_id,
            continue_prompt,
            max_errors,
            errors: 0,
        }
    }

    /// Keep `partial` as an assistant turn, then decide whether to retry.
    ///
    /// On retry a synthetic continue turn is appended so the next attempt
    /// picks up where the failed one stopped.
    pub fn record_failure(&mut self, partial: &str, error: &AiError) -> RetryDecision {
        let partial = partial.trim();
        if !partial.is_empty() {
            self.store
                .append(self.session_id, Turn::assistant(partial.to_string()));
        }

        self.errors += 1;
        if self.errors >= self.max_errors {
            tracing::warn!(
                session_id = self.session_id,
                errors = self.errors,
                error = %error,
                "Turn failed, retry limit reached"
            );
            return RetryDecision::Exhausted;
        }

        tracing::warn!(
            session_id = self.session_id,
            attempt = self.errors,
            retryable = error.is_retryable(),
            error = %error,
            "Turn failed, retrying"
        );
        self.store
            .append(self.session_id, Turn::user(self.continue_prompt.to_string()));
        RetryDecision::Retry {
            attempt: self.errors,
        }
    }

    pub fn record_success(&mut self) {
        self.errors = 0;
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use everbrowser_ai::TurnRole;

    use super::*;

    fn error() -> AiError {
        AiError::Llm("connection reset".to_string())
    }

    #[test]
    fn test_partial_is_preserved_before_retry() {
        let store = SessionStore::new(20);
        let mut governor = RetryGovernor::new(&store, "s", "continue", 3);

        assert_eq!(
            governor.record_failure("half an answer ", &error()),
            RetryDecision::Retry { attempt: 1 }
        );
        let history = store.read_history("s");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, TurnRole::Assistant);
        assert_eq!(history[0].content, "half an answer");
        assert_eq!(history[1].role, TurnRole::User);
        assert_eq!(history[1].content, "continue");
    }

    #[test]
    fn test_empty_partial_is_not_stored() {
        let store = SessionStore::new(20);
        let mut governor = RetryGovernor::new(&store, "s", "continue", 3);
        governor.record_failure("  ", &error());
        let history = store.read_history("s");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "continue");
    }

    #[test]
    fn test_exhausted_after_ceiling() {
        let store = SessionStore::new(20);
        let mut governor = RetryGovernor::new(&store, "s", "continue", 2);
        assert!(matches!(
            governor.record_failure("a", &error()),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(
            governor.record_failure("b", &error()),
            RetryDecision::Exhausted
        );
        let contents: Vec<String> = store
            .read_history("s")
            .into_iter()
            .map(|t| t.content)
            .collect();
        assert_eq!(contents, vec!["a", "continue", "b"]);
    }

    #[test]
    fn test_success_resets_counter() {
        let store = SessionStore::new(20);
        let mut governor = RetryGovernor::new(&store, "s", "continue", 2);
        governor.record_failure("", &error());
        governor.record_success();
        assert_eq!(governor.consecutive_errors(), 0);
        assert!(matches!(
            governor.record_failure("", &error()),
            RetryDecision::Retry { attempt: 1 }
        ));
    }
}
