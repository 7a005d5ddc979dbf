//! Short-term conversation state

use crate::inference::ChatMessage;
use crate::SessionConfig;
use std::time::{Duration, Instant};
use tracing::debug;

/// Role-tagged history of the current conversation.
///
/// History is forgotten when the user has been idle longer than the idle
/// window, and right after a turn whose input contains a reset keyword.
#[derive(Debug, Clone)]
pub struct ChatSession {
    history: Vec<ChatMessage>,
    last_interaction: Option<Instant>,
    idle_reset: Duration,
    reset_keywords: Vec<String>,
}

impl ChatSession {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            history: Vec::new(),
            last_interaction: None,
            idle_reset: config.idle_reset,
            reset_keywords: config.reset_keywords.clone(),
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Whether a conversation is in progress
    pub fn is_active(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Mark the start of a turn at `now`. Returns true if the history was
    /// dropped because the previous turn was too long ago.
    pub fn touch(&mut self, now: Instant) -> bool {
        let expired = self
            .last_interaction
            .is_some_and(|last| now.saturating_duration_since(last) > self.idle_reset);
        self.last_interaction = Some(now);
        if expired && self.is_active() {
            debug!("session idle for over {:?}, forgetting history", self.idle_reset);
            self.clear();
            return true;
        }
        false
    }

    /// Append a finished exchange. Returns true if the input ended the
    /// conversation via a reset keyword.
    pub fn record_turn(&mut self, user_input: &str, reply: &str) -> bool {
        self.history.push(ChatMessage::user(user_input));
        self.history.push(ChatMessage::assistant(reply));

        if self
            .reset_keywords
            .iter()
            .any(|k| !k.is_empty() && user_input.contains(k.as_str()))
        {
            debug!("reset keyword in input, closing conversation");
            self.clear();
            return true;
        }
        false
    }
}
