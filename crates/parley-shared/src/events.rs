//! WebSocket event vocabulary.
//!
//! Frames on the wire are JSON objects of the form
//! `{ "event": <name>, "data": <payload> }`.  The event names are part of
//! the client protocol and must not change.

use serde::{Deserialize, Serialize};

use crate::types::{ChatId, EphemeralMessage, UserId};

/// Events a client may send over its socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Compose a new message into a chat.
    #[serde(rename_all = "camelCase")]
    NewMessage { chat_id: ChatId, content: String },

    /// The user started typing in a chat.
    #[serde(rename_all = "camelCase")]
    StartTyping { chat_id: ChatId },

    /// The user stopped typing in a chat.
    #[serde(rename_all = "camelCase")]
    StopTyping { chat_id: ChatId },

    /// The user opened a conversation view.
    #[serde(rename_all = "camelCase")]
    ChatJoined { chat_id: ChatId },

    /// The user closed a conversation view.
    #[serde(rename_all = "camelCase")]
    ChatLeaved { chat_id: ChatId },
}

/// Events the server pushes to live connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Full message payload for clients rendering the conversation.
    #[serde(rename_all = "camelCase")]
    NewMessage {
        chat_id: ChatId,
        message: EphemeralMessage,
    },

    /// Lightweight notification carrying only the chat id, for clients
    /// that track unread counts without the payload cost.
    #[serde(rename_all = "camelCase")]
    NewMessageAlert { chat_id: ChatId },

    #[serde(rename_all = "camelCase")]
    StartTyping { chat_id: ChatId },

    #[serde(rename_all = "camelCase")]
    StopTyping { chat_id: ChatId },

    /// Snapshot of every user currently considered online.
    OnlineUsers(Vec<UserId>),

    /// Human-readable notice, optionally scoped to a chat.
    #[serde(rename_all = "camelCase")]
    Alert {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        chat_id: Option<ChatId>,
    },

    /// The recipient's chat list changed; refetch it.
    RefetchChats,

    /// The recipient received a new friend request.
    NewRequest,
}

impl ClientEvent {
    /// Parse a frame received from a client.
    pub fn from_frame(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl ServerEvent {
    /// Serialize to a wire frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_event_names() {
        let frame = r#"{"event":"startTyping","data":{"chatId":"7f1c3f5e-52b4-45cd-86ad-a9cbcaa4bda2"}}"#;
        let event = ClientEvent::from_frame(frame).unwrap();
        assert!(matches!(event, ClientEvent::StartTyping { .. }));

        let frame = r#"{"event":"chatLeaved","data":{"chatId":"7f1c3f5e-52b4-45cd-86ad-a9cbcaa4bda2"}}"#;
        let event = ClientEvent::from_frame(frame).unwrap();
        assert!(matches!(event, ClientEvent::ChatLeaved { .. }));
    }

    #[test]
    fn test_server_frame_event_names() {
        let frame = ServerEvent::NewMessageAlert {
            chat_id: ChatId::new(),
        }
        .to_frame()
        .unwrap();
        assert!(frame.contains(r#""event":"newMessageAlert""#));

        let frame = ServerEvent::OnlineUsers(vec![UserId::new()]).to_frame().unwrap();
        assert!(frame.contains(r#""event":"onlineUsers""#));

        let frame = ServerEvent::RefetchChats.to_frame().unwrap();
        assert!(frame.contains(r#""event":"refetchChats""#));

        let frame = ServerEvent::NewRequest.to_frame().unwrap();
        assert!(frame.contains(r#""event":"newRequest""#));
    }

    #[test]
    fn test_unknown_event_rejected() {
        let frame = r#"{"event":"shutdownServer","data":{}}"#;
        assert!(ClientEvent::from_frame(frame).is_err());
    }
}
