//! Conversation - bounded turn history for one session
//!
//! Turns are appended at the back and evicted from the front once the cap is
//! exceeded. A system turn at index 0 is never evicted.

use std::collections::VecDeque;

use everbrowser_ai::Turn;

#[derive(Debug, Clone)]
pub struct Conversation {
    /// Turns in chronological order (oldest first)
    turns: VecDeque<Turn>,
    /// Maximum number of turns to retain, system turn included
    max_turns: usize,
}

impl Conversation {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns,
        }
    }

    /// Append a turn, then evict the oldest non-system turns over the cap.
    pub fn append(&mut self, turn: Turn) {
        self.turns.push_back(turn);

        while self.turns.len() > self.max_turns {
            let keeps_system = self.turns.front().is_some_and(Turn::is_system);
            if keeps_system {
                if self.turns.len() <= 1 {
                    break;
                }
                self.turns.remove(1);
            } else {
                self.turns.pop_front();
            }
        }
    }

    /// Seed the system turn into an empty conversation.
    ///
    /// Returns true when the turn was added.
    pub fn seed_if_empty(&mut self, system_prompt: &str) -> bool {
        if !self.turns.is_empty() {
            return false;
        }
        self.turns.push_back(Turn::system(system_prompt));
        true
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }
}
