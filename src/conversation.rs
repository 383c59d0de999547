//! Conversation history bookkeeping.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::log_debug;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: String, // "user", "assistant", "system"
    pub content: String,
    pub timestamp: u64,
}

impl ChatMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: role.to_string(),
            content: content.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

/// Ordered message history for one conversation, passed verbatim to the
/// pipeline on every turn.
#[derive(Default)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: &str) {
        self.messages.push(ChatMessage::new("user", content));
    }

    /// Append the assistant reply, skipping an exact duplicate of the last
    /// assistant entry (a finalization callback may fire more than once
    /// upstream).
    pub fn push_assistant(&mut self, content: &str) {
        if let Some(last) = self.messages.last() {
            if last.role == "assistant" && last.content == content {
                log_debug!("Skipping duplicate assistant entry ({} chars)", content.len());
                return;
            }
        }
        self.messages.push(ChatMessage::new("assistant", content));
    }

    /// Insert a system message at the front unless one is already present.
    pub fn ensure_system_prompt(&mut self, prompt: &str) {
        if self.messages.iter().any(|m| m.role == "system") {
            return;
        }
        self.messages.insert(0, ChatMessage::new("system", prompt));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_inserted_once_at_front() {
        let mut history = ConversationHistory::new();
        history.push_user("hi");
        history.ensure_system_prompt("You are a helpful assistant.");
        history.ensure_system_prompt("You are a helpful assistant.");

        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[0].role, "system");
        assert_eq!(history.messages()[1].role, "user");
    }

    #[test]
    fn duplicate_assistant_reply_is_skipped() {
        let mut history = ConversationHistory::new();
        history.push_user("hi");
        history.push_assistant("hello");
        history.push_assistant("hello");
        assert_eq!(history.len(), 2);

        history.push_assistant("something else");
        assert_eq!(history.len(), 3);
    }
}
