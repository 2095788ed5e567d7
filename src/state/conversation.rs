//! Process-wide conversation history.
//!
//! Shared by every request in the process, like the single active sandbox.
//! Only the most recent messages and edits are kept.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

pub const MAX_MESSAGES: usize = 20;
pub const MAX_EDITS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub edited_files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EditKind {
    Create,
    Edit,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRecord {
    pub timestamp: DateTime<Utc>,
    pub user_request: String,
    pub edit_type: EditKind,
    pub target_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub conversation_id: String,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub messages: Vec<ConversationMessage>,
    pub edits: Vec<EditRecord>,
}

impl Conversation {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            conversation_id: format!("conv-{}", Uuid::new_v4()),
            started_at: now,
            last_updated: now,
            messages: Vec::new(),
            edits: Vec::new(),
        }
    }
}

pub struct ConversationState {
    inner: Mutex<Conversation>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Conversation::new()),
        }
    }

    pub fn snapshot(&self) -> Conversation {
        self.inner.lock().clone()
    }

    pub fn record_user(&self, content: &str) {
        self.push(MessageRole::User, content, Vec::new());
    }

    pub fn record_assistant(&self, content: &str, edited_files: Vec<String>) {
        self.push(MessageRole::Assistant, content, edited_files);
    }

    pub fn record_edit(&self, user_request: &str, edit_type: EditKind, target_files: Vec<String>) {
        let mut conv = self.inner.lock();
        let now = Utc::now();
        conv.edits.push(EditRecord {
            timestamp: now,
            user_request: user_request.to_string(),
            edit_type,
            target_files,
        });
        trim_front(&mut conv.edits, MAX_EDITS);
        conv.last_updated = now;
    }

    /// Drop all history and start a new conversation id.
    pub fn reset(&self) {
        *self.inner.lock() = Conversation::new();
    }

    fn push(&self, role: MessageRole, content: &str, edited_files: Vec<String>) {
        let mut conv = self.inner.lock();
        let now = Utc::now();
        conv.messages.push(ConversationMessage {
            id: format!("msg-{}", Uuid::new_v4()),
            role,
            content: content.to_string(),
            timestamp: now,
            edited_files,
        });
        trim_front(&mut conv.messages, MAX_MESSAGES);
        conv.last_updated = now;
    }
}

fn trim_front<T>(items: &mut Vec<T>, max: usize) {
    if items.len() > max {
        let excess = items.len() - max;
        items.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_keeps_last_twenty_messages() {
        let state = ConversationState::new();
        for i in 0..25 {
            state.record_user(&format!("prompt {i}"));
        }
        let conv = state.snapshot();
        assert_eq!(conv.messages.len(), MAX_MESSAGES);
        assert_eq!(conv.messages[0].content, "prompt 5");
        assert_eq!(conv.messages[19].content, "prompt 24");
    }

    #[test]
    fn edits_are_bounded() {
        let state = ConversationState::new();
        for i in 0..12 {
            state.record_edit(&format!("change {i}"), EditKind::Edit, vec!["src/App.jsx".into()]);
        }
        let conv = state.snapshot();
        assert_eq!(conv.edits.len(), MAX_EDITS);
        assert_eq!(conv.edits[0].user_request, "change 2");
    }

    #[test]
    fn reset_starts_new_conversation() {
        let state = ConversationState::new();
        let first = state.snapshot().conversation_id;
        state.record_assistant("done", vec!["a.js".into()]);

        state.reset();
        let conv = state.snapshot();
        assert_ne!(conv.conversation_id, first);
        assert!(conv.messages.is_empty());
    }

    #[test]
    fn serializes_camel_case() {
        let state = ConversationState::new();
        state.record_assistant("done", vec!["a.js".into()]);
        let json = serde_json::to_value(state.snapshot()).unwrap();
        assert!(json["conversationId"].is_string());
        assert_eq!(json["messages"][0]["role"], "assistant");
        assert_eq!(json["messages"][0]["editedFiles"][0], "a.js");
    }
}
