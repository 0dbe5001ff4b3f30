//! WebSocket wire protocol.
//!
//! Every frame is a single JSON object tagged by a `type` field. Clients send
//! [`ClientEvent`]s; the server fans out [`ServerEvent`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::{MessageId, MessageKind, RoomId, UserId};

/// Events a connected client may send into its room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Post a new text message, optionally replying to another message.
    ChatMessage {
        #[serde(default)]
        content: String,
        /// Raw id of the message being replied to. Unparseable or unknown
        /// ids are treated as "no reply".
        #[serde(default)]
        reply_to: Option<String>,
    },

    /// The user started composing.
    TypingStart,

    /// The user stopped composing.
    TypingStop,

    /// The user has read a message.
    MessageRead { message_id: MessageId },

    /// Delete one of the user's own messages.
    DeleteMessage { message_id: MessageId },

    /// Replace the content of one of the user's own messages.
    EditMessage {
        message_id: MessageId,
        #[serde(default)]
        content: String,
    },
}

impl ClientEvent {
    const TAGS: [&'static str; 6] = [
        "chat_message",
        "typing_start",
        "typing_stop",
        "message_read",
        "delete_message",
        "edit_message",
    ];

    /// Decode one inbound text frame.
    ///
    /// Returns `Ok(None)` for well-formed frames whose tag this server does
    /// not know; those are ignored rather than treated as errors.
    pub fn parse(frame: &str) -> Result<Option<Self>, ProtocolError> {
        let value: Value = serde_json::from_str(frame)?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingTag)?
            .to_owned();

        if !Self::TAGS.contains(&tag.as_str()) {
            return Ok(None);
        }

        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| ProtocolError::Malformed {
                tag,
                reason: e.to_string(),
            })
    }

    /// Short name of the event, used in logs.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ChatMessage { .. } => "chat_message",
            Self::TypingStart => "typing_start",
            Self::TypingStop => "typing_stop",
            Self::MessageRead { .. } => "message_read",
            Self::DeleteMessage { .. } => "delete_message",
            Self::EditMessage { .. } => "edit_message",
        }
    }
}

/// Events delivered to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A new message was posted in the room.
    ChatMessage { message: MessagePayload },

    /// A member came online or went offline.
    UserStatus {
        user_id: UserId,
        username: String,
        is_online: bool,
        online_count: u64,
    },

    /// A member started or stopped typing.
    TypingIndicator {
        user_id: UserId,
        username: String,
        is_typing: bool,
    },

    /// A member read a message.
    MessageReadStatus {
        message_id: MessageId,
        user_id: UserId,
        username: String,
    },

    /// A message was deleted by its author.
    MessageDeleted { message_id: MessageId },

    /// A message was edited by its author.
    MessageEdited { message: MessagePayload },

    /// Sent only to the client whose event was rejected.
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Encode as a single text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Public view of a user embedded in other payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub username: String,
}

/// A message as clients see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: MessageId,
    pub room: RoomId,
    pub sender: UserRef,
    pub message_type: MessageKind,
    pub content: String,
    /// Blob reference of the attached image, for `image` messages.
    pub image: Option<String>,
    /// Blob reference of the attached video, for `video` messages.
    pub video: Option<String>,
    pub reply_to: Option<MessageId>,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub read_by: Vec<UserRef>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_chat_message_with_reply() {
        let event = ClientEvent::parse(
            r#"{"type":"chat_message","content":"hi","reply_to":"6f1c1f3e-56a3-4f0e-9d43-1f2a3b4c5d6e"}"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(
            event,
            ClientEvent::ChatMessage {
                content: "hi".into(),
                reply_to: Some("6f1c1f3e-56a3-4f0e-9d43-1f2a3b4c5d6e".into()),
            }
        );
        assert_eq!(event.tag(), "chat_message");
    }

    #[test]
    fn chat_message_fields_default() {
        let event = ClientEvent::parse(r#"{"type":"chat_message"}"#).unwrap().unwrap();
        assert_eq!(
            event,
            ClientEvent::ChatMessage {
                content: String::new(),
                reply_to: None,
            }
        );
    }

    #[test]
    fn unknown_tag_is_ignored() {
        assert!(ClientEvent::parse(r#"{"type":"wave","at":"you"}"#).unwrap().is_none());
    }

    #[test]
    fn missing_tag_and_bad_json_are_errors() {
        assert!(matches!(
            ClientEvent::parse(r#"{"content":"hi"}"#),
            Err(ProtocolError::MissingTag)
        ));
        assert!(matches!(
            ClientEvent::parse("not json"),
            Err(ProtocolError::NotJson(_))
        ));
    }

    #[test]
    fn known_tag_with_bad_fields_is_malformed() {
        let err = ClientEvent::parse(r#"{"type":"message_read","message_id":"nope"}"#).unwrap_err();
        match err {
            ProtocolError::Malformed { tag, .. } => assert_eq!(tag, "message_read"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn user_status_frame_shape() {
        let frame = ServerEvent::UserStatus {
            user_id: UserId(7),
            username: "ada".into(),
            is_online: true,
            online_count: 2,
        }
        .to_frame()
        .unwrap();

        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "user_status",
                "user_id": 7,
                "username": "ada",
                "is_online": true,
                "online_count": 2
            })
        );
    }

    #[test]
    fn error_frame_shape() {
        let frame = ServerEvent::error("nope").to_frame().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"type": "error", "message": "nope"}));
    }
}
