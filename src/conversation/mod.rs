//! Conversation types: messages, roles and derived titles

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Longest title derived from a conversation's first human message
pub const TITLE_MAX_CHARS: usize = 100;

/// Title shown for conversations without a human message yet
pub const UNTITLED: &str = "New Conversation";

/// Opaque identifier grouping the messages of one conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier for a new conversation
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque message identifier.
///
/// Rows written by the workflow carry numeric serial ids while optimistic
/// entries carry UUIDs, so both forms are normalised to a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(i64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Number(n) => MessageId(n.to_string()),
            RawId::Text(s) => MessageId(s),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Ai,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::Human => "you",
            Role::Ai => "ai",
        }
    }
}

/// Message body as stored by the workflow: `{content, type}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub content: String,
    #[serde(rename = "type")]
    pub role: Role,
}

/// A single chat history row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub message: MessageBody,
}

impl Message {
    /// Build an optimistic human entry for text the user just submitted
    pub fn human(session_id: SessionId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            session_id,
            message: MessageBody {
                content: content.into(),
                role: Role::Human,
            },
        }
    }

    pub fn role(&self) -> Role {
        self.message.role
    }

    pub fn content(&self) -> &str {
        &self.message.content
    }
}

/// Sidebar entry for a stored conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationPreview {
    pub session_id: SessionId,
    pub title: String,
}

/// Derive a display title from the first human message of a conversation
pub fn derive_title(messages: &[Message]) -> String {
    messages
        .iter()
        .find(|m| m.role() == Role::Human)
        .map(|m| truncate_title(m.content()))
        .unwrap_or_else(|| UNTITLED.to_string())
}

fn truncate_title(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, role: Role, content: &str) -> Message {
        Message {
            id: MessageId::new(id),
            session_id: SessionId::new("s1"),
            message: MessageBody {
                content: content.to_string(),
                role,
            },
        }
    }

    #[test]
    fn test_parse_stored_row() {
        let json = r#"{
            "id": 42,
            "session_id": "abc",
            "message": {"type": "ai", "content": "Hi there", "additional_kwargs": {}}
        }"#;

        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.id.as_str(), "42");
        assert_eq!(message.session_id.as_str(), "abc");
        assert_eq!(message.role(), Role::Ai);
        assert_eq!(message.content(), "Hi there");
    }

    #[test]
    fn test_parse_string_id() {
        let json = r#"{"id": "x", "session_id": "abc", "message": {"type": "human", "content": "Hello"}}"#;
        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.id, MessageId::new("x"));
        assert_eq!(message.role(), Role::Human);
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let json = r#"{"id": 1, "session_id": "abc", "message": {"type": "tool", "content": "{}"}}"#;
        assert!(serde_json::from_str::<Message>(json).is_err());
    }

    #[test]
    fn test_title_from_first_human_message() {
        let messages = vec![
            row("1", Role::Ai, "Welcome"),
            row("2", Role::Human, "Plan a launch"),
            row("3", Role::Human, "Second question"),
        ];
        assert_eq!(derive_title(&messages), "Plan a launch");
    }

    #[test]
    fn test_title_truncated_to_100_chars() {
        let long = "é".repeat(150);
        let title = derive_title(&[row("1", Role::Human, &long)]);
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);

        let exact = "a".repeat(TITLE_MAX_CHARS);
        assert_eq!(derive_title(&[row("1", Role::Human, &exact)]), exact);
    }

    #[test]
    fn test_title_without_human_message() {
        assert_eq!(derive_title(&[]), UNTITLED);
        assert_eq!(derive_title(&[row("1", Role::Ai, "hi")]), UNTITLED);
    }
}
