//! Completion judge: asks the agent whether the task is finished.

use std::sync::Arc;

use everbrowser_ai::{AgentCapability, Turn};
use serde::Serialize;

use crate::normalizer::strip_reasoning;
use crate::session::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Continue,
    UserActionRequired,
}

// Whole-word labels, checked in this order
const USER_ACTION_LABELS: &[&[&str]] = &[
    &["user", "action", "required"],
    &["user", "action", "needed"],
];
const COMPLETED_LABELS: &[&[&str]] = &[&["completed"], &["complete"], &["finished"]];
const CONTINUE_LABELS: &[&[&str]] = &[
    &["continue"],
    &["in", "progress"],
    &["incomplete"],
    &["uncompleted"],
    &["unfinished"],
];
// A label within two words after one of these is negated
const NEGATIONS: &[&str] = &["not", "never", "isn", "hasn", "nor"];

// Substring fallback for answers without word boundaries
const USER_ACTION_PHRASES: &[&str] = &["需要用户", "用户操作"];
const COMPLETED_PHRASES: &[&str] = &["已完成"];
const CONTINUE_PHRASES: &[&str] = &["继续", "未完成"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelHit {
    Absent,
    Negated,
    Affirmed,
}

fn find_label(words: &[&str], labels: &[&[&str]]) -> LabelHit {
    let mut hit = LabelHit::Absent;
    for label in labels {
        for (at, window) in words.windows(label.len()).enumerate() {
            if window != *label {
                continue;
            }
            let negated = words[at.saturating_sub(2)..at]
                .iter()
                .any(|word| NEGATIONS.contains(word));
            if !negated {
                return LabelHit::Affirmed;
            }
            hit = LabelHit::Negated;
        }
    }
    hit
}

/// Map a self-reported status answer to a label. None when nothing matches.
///
/// "not completed" reads as `Continue`; an affirmed label of higher priority
/// still wins over it.
pub fn parse_task_status(answer: &str) -> Option<TaskStatus> {
    let normalized = strip_reasoning(answer)
        .to_lowercase()
        .replace(['_', '-'], " ");
    let words: Vec<&str> = normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();

    let completed = find_label(&words, COMPLETED_LABELS);
    if find_label(&words, USER_ACTION_LABELS) == LabelHit::Affirmed {
        return Some(TaskStatus::UserActionRequired);
    }
    if completed == LabelHit::Affirmed {
        return Some(TaskStatus::Completed);
    }
    if completed == LabelHit::Negated
        || find_label(&words, CONTINUE_LABELS) == LabelHit::Affirmed
    {
        return Some(TaskStatus::Continue);
    }

    let contains = |phrases: &[&str]| phrases.iter().any(|p| normalized.contains(p));
    if contains(USER_ACTION_PHRASES) {
        Some(TaskStatus::UserActionRequired)
    } else if contains(COMPLETED_PHRASES) {
        Some(TaskStatus::Completed)
    } else if contains(CONTINUE_PHRASES) {
        Some(TaskStatus::Continue)
    } else {
        None
    }
}

/// Classifies task state with one extra, unpersisted, tool-free agent turn.
pub struct CompletionJudge {
    store: Arc<SessionStore>,
    judge_prompt: String,
}

impl CompletionJudge {
    pub fn new(store: Arc<SessionStore>, judge_prompt: impl Into<String>) -> Self {
        Self {
            store,
            judge_prompt: judge_prompt.into(),
        }
    }

    /// Falls back to `Completed` when the call fails or the answer is unclear.
    pub async fn classify(&self, agent: &dyn AgentCapability, session_id: &str) -> TaskStatus {
        let mut probe = self.store.get_or_create_history(session_id);
        probe.push(Turn::user(self.judge_prompt.clone()));

        let answer = match agent.invoke_turn(probe).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Completion check failed, assuming completed");
                return TaskStatus::Completed;
            }
        };

        match parse_task_status(&answer) {
            Some(status) => {
                tracing::debug!(session_id, ?status, "Completion check");
                status
            }
            None => {
                tracing::warn!(
                    session_id,
                    answer = %answer.chars().take(200).collect::<String>(),
                    "Unrecognized completion answer, assuming completed"
                );
                TaskStatus::Completed
            }
        }
    }
}
