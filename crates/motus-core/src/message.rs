//! Chat messages, conversations, and the realtime wire events that carry them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::UserId;
use crate::motion_file::{deserialize_timestamp, MotionFile};

/// Backend identifier of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// User id of the author
    pub sender: UserId,
    pub content: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// The thread between exactly one patient and one physician
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId {
    pub patient_id: UserId,
    pub physician_id: UserId,
}

impl ConversationId {
    pub fn new(patient_id: UserId, physician_id: UserId) -> Self {
        Self {
            patient_id,
            physician_id,
        }
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.patient_id, self.physician_id)
    }
}

/// Events the client emits on the realtime channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Subscribe to pushes for a conversation
    Join(ConversationId),
    /// Stop receiving pushes for a conversation
    Leave(ConversationId),
    /// Post a message; the backend persists it and echoes it to every member
    Message(OutgoingMessage),
}

/// Payload of a client `message` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub patient_id: UserId,
    pub physician_id: UserId,
    pub sender: UserId,
    pub content: String,
}

impl OutgoingMessage {
    pub fn new(conversation: ConversationId, sender: UserId, content: impl Into<String>) -> Self {
        Self {
            patient_id: conversation.patient_id,
            physician_id: conversation.physician_id,
            sender,
            content: content.into(),
        }
    }

    pub fn conversation(&self) -> ConversationId {
        ConversationId::new(self.patient_id, self.physician_id)
    }
}

/// Events the backend pushes on the realtime channel
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A message was posted to a conversation this client joined
    Message(PushedMessage),
    /// A motion file was uploaded or assigned
    NewFile(MotionFile),
    /// The account exists but has no roles yet
    Wait { message: String },
    /// Roles changed; the session must be renewed
    Relogin { message: String },
}

/// Payload of a server `message` event: the stored message tagged with its conversation
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PushedMessage {
    pub patient_id: UserId,
    pub physician_id: UserId,
    pub id: MessageId,
    pub sender: UserId,
    pub content: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl PushedMessage {
    pub fn conversation(&self) -> ConversationId {
        ConversationId::new(self.patient_id, self.physician_id)
    }

    pub fn into_parts(self) -> (ConversationId, Message) {
        let conversation = self.conversation();
        let message = Message {
            id: self.id,
            sender: self.sender,
            content: self.content,
            timestamp: self.timestamp,
        };
        (conversation, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_wire_format() {
        let conversation = ConversationId::new(UserId(4), UserId(9));
        let join = serde_json::to_value(ClientEvent::Join(conversation)).unwrap();
        assert_eq!(
            join,
            serde_json::json!({"event": "join", "data": {"patient_id": 4, "physician_id": 9}})
        );

        let message = serde_json::to_value(ClientEvent::Message(OutgoingMessage::new(
            conversation,
            UserId(9),
            "See you Tuesday",
        )))
        .unwrap();
        assert_eq!(message["event"], "message");
        assert_eq!(message["data"]["patient_id"], 4);
        assert_eq!(message["data"]["sender"], 9);
    }

    #[test]
    fn test_server_message_event() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"event": "message", "data": {
                "id": 31, "chat_id": 2, "sender": 4, "content": "Done with my exercises",
                "timestamp": "2025-04-15 10:00:00.123456+00:00",
                "patient_id": 4, "physician_id": 9
            }}"#,
        )
        .unwrap();

        match event {
            ServerEvent::Message(pushed) => {
                let (conversation, message) = pushed.into_parts();
                assert_eq!(conversation, ConversationId::new(UserId(4), UserId(9)));
                assert_eq!(message.id, MessageId(31));
                assert_eq!(message.sender, UserId(4));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_history_message_rfc2822() {
        let message: Message = serde_json::from_str(
            r#"{"id": 1, "chat_id": 2, "sender": 9, "content": "hi",
                "timestamp": "Tue, 15 Apr 2025 10:00:00 GMT"}"#,
        )
        .unwrap();
        assert_eq!(message.id, MessageId(1));
    }
}
