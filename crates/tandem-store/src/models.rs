//! Domain model structs persisted in the chat database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tandem_shared::types::{MessageId, MessageKind, RoomId, UserId};

use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A user mirrored from the auth service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// When this user was first seen by the chat server.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    /// Direct conversation, conventionally between exactly two members.
    Private,
    Group,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Self::Private),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

impl Default for RoomType {
    fn default() -> Self {
        Self::Private
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRoom {
    pub id: RoomId,
    /// Optional display name; private rooms usually have none.
    pub name: Option<String>,
    pub room_type: RoomType,
    /// Creator, cleared when that user is deleted.
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    /// Bumped on every new message.
    pub updated_at: DateTime<Utc>,
}

/// A room as listed for one of its members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: ChatRoom,
    pub total_members: u64,
    pub online_count: u64,
    pub unread_count: u32,
}

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

/// Per-user state within a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Membership {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub role: MemberRole,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub joined_at: DateTime<Utc>,
    pub unread_count: u32,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: String,
    /// Opaque blob reference for image/video messages.
    pub media_ref: Option<String>,
    /// Message this one answers. Becomes `None` if that message is deleted.
    pub reply_to: Option<MessageId>,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`Database::insert_message`](crate::Database::insert_message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: String,
    pub media_ref: Option<String>,
    pub reply_to: Option<MessageId>,
}

impl NewMessage {
    pub fn text(room_id: RoomId, sender_id: UserId, content: impl Into<String>) -> Self {
        Self {
            room_id,
            sender_id,
            kind: MessageKind::Text,
            content: content.into(),
            media_ref: None,
            reply_to: None,
        }
    }

    pub fn replying_to(mut self, reply_to: Option<MessageId>) -> Self {
        self.reply_to = reply_to;
        self
    }

    /// Text messages need content; image and video messages need media.
    pub fn validate(&self) -> Result<()> {
        if self.kind == MessageKind::Text && self.content.trim().is_empty() {
            return Err(StoreError::Invalid(
                "content is required for text messages".into(),
            ));
        }
        if self.kind.requires_media() && self.media_ref.is_none() {
            return Err(StoreError::Invalid(format!(
                "media is required for {} messages",
                self.kind.as_str()
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Read receipt
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Typing indicator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingIndicator {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_requires_content() {
        let msg = NewMessage::text(RoomId::new(), UserId(1), "   ");
        assert!(matches!(msg.validate(), Err(StoreError::Invalid(_))));
        assert!(NewMessage::text(RoomId::new(), UserId(1), "hi").validate().is_ok());
    }

    #[test]
    fn media_message_requires_reference() {
        let mut msg = NewMessage::text(RoomId::new(), UserId(1), "");
        msg.kind = MessageKind::Image;
        assert!(msg.validate().is_err());
        msg.media_ref = Some("blob:abc".into());
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn enum_columns_parse() {
        assert_eq!(RoomType::parse("group"), Some(RoomType::Group));
        assert_eq!(RoomType::parse("public"), None);
        assert_eq!(MemberRole::parse(MemberRole::Admin.as_str()), Some(MemberRole::Admin));
    }
}
