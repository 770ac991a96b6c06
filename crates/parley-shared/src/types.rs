use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// User identity = UUID v4 assigned at registration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ChatId(pub Uuid);

impl ChatId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message identity.  The id carried in an [`EphemeralMessage`] and the id
/// the store assigns to the durable row are independent values; they are
/// not reconciled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lightweight sender description embedded in delivery payloads so clients
/// can render a message without a profile lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SenderSummary {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
    pub avatar: Option<String>,
}

/// The in-memory message representation pushed to live connections.
///
/// Constructed fresh per delivery and never stored; the durable record is
/// written separately with its own id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EphemeralMessage {
    #[serde(rename = "_id")]
    pub id: MessageId,
    pub content: String,
    pub sender: SenderSummary,
    #[serde(rename = "chatId")]
    pub chat_id: ChatId,
    /// Public URLs of attached files, when the message carries any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl EphemeralMessage {
    /// Build a delivery payload with a freshly generated id, timestamped now.
    pub fn compose(sender: SenderSummary, chat_id: ChatId, content: String) -> Self {
        Self {
            id: MessageId::new(),
            content,
            sender,
            chat_id,
            attachments: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_roundtrip() {
        let id = UserId::new();
        let parsed = UserId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_ephemeral_message_fresh_id() {
        let sender = SenderSummary {
            id: UserId::new(),
            name: "alice".into(),
            avatar: None,
        };
        let chat = ChatId::new();
        let a = EphemeralMessage::compose(sender.clone(), chat, "hi".into());
        let b = EphemeralMessage::compose(sender, chat, "hi".into());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_sender_summary_wire_shape() {
        let summary = SenderSummary {
            id: UserId::new(),
            name: "bob".into(),
            avatar: Some("http://host/blob/1".into()),
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert!(value.get("_id").is_some());
        assert!(value.get("name").is_some());
    }
}
