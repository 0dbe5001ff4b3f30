use rusqlite::{params, OptionalExtension};

use tandem_shared::protocol::{MessagePayload, UserRef};
use tandem_shared::types::{MessageId, MessageKind, RoomId, UserId};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{Message, NewMessage};
use crate::sql;

/// Result of [`Database::record_chat_message_within`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    Recorded(Message),
    /// The sender had already used up the allowance; nothing was written.
    QuotaExceeded { sent: u64 },
}

const MESSAGE_COLUMNS: &str =
    "id, room_id, sender_id, message_type, content, media_ref, reply_to, is_edited, created_at, updated_at";

impl Database {
    pub fn insert_message(&self, new: &NewMessage) -> Result<Message> {
        new.validate()?;

        let now = sql::now();
        let message = Message {
            id: MessageId::new(),
            room_id: new.room_id,
            sender_id: new.sender_id,
            kind: new.kind,
            content: new.content.clone(),
            media_ref: new.media_ref.clone(),
            reply_to: new.reply_to,
            is_edited: false,
            created_at: now,
            updated_at: now,
        };

        self.conn().execute(
            "INSERT INTO messages
                (id, room_id, sender_id, message_type, content, media_ref, reply_to,
                 is_edited, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)",
            params![
                message.id.to_string(),
                message.room_id.to_string(),
                message.sender_id.0,
                message.kind.as_str(),
                message.content,
                message.media_ref,
                message.reply_to.map(|r| r.to_string()),
                sql::fmt_ts(&now),
            ],
        )?;
        Ok(message)
    }

    /// Persist a message together with its side effects: the room's
    /// `updated_at` is bumped and every other member's unread counter
    /// incremented, all in one transaction.
    pub fn record_chat_message(&self, new: &NewMessage) -> Result<Message> {
        let tx = self.conn().unchecked_transaction()?;
        let message = self.write_chat_message(new)?;
        tx.commit()?;
        Ok(message)
    }

    /// Like [`Self::record_chat_message`], but refuses the write when the
    /// sender's lifetime count has reached `allowance`. `None` means no
    /// limit. The count and the insert share one transaction, so concurrent
    /// senders cannot both slip under the allowance.
    pub fn record_chat_message_within(
        &self,
        new: &NewMessage,
        allowance: Option<u64>,
    ) -> Result<ChatOutcome> {
        let tx = self.conn().unchecked_transaction()?;
        if let Some(limit) = allowance {
            let sent = self.count_messages_by_sender(new.sender_id)?;
            if sent >= limit {
                return Ok(ChatOutcome::QuotaExceeded { sent });
            }
        }
        let message = self.write_chat_message(new)?;
        tx.commit()?;
        Ok(ChatOutcome::Recorded(message))
    }

    fn write_chat_message(&self, new: &NewMessage) -> Result<Message> {
        let message = self.insert_message(new)?;
        self.touch_room(new.room_id)?;
        self.increment_unread_except(new.room_id, new.sender_id)?;
        Ok(message)
    }

    /// Resolve a client-supplied reply target. Ids that do not parse or do
    /// not name a message in `room` resolve to `None`.
    pub fn resolve_reply_target(&self, room: RoomId, raw: &str) -> Result<Option<MessageId>> {
        let Ok(id) = raw.trim().parse::<MessageId>() else {
            return Ok(None);
        };
        Ok(self.find_message_in_room(room, id)?.map(|m| m.id))
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)
    }

    pub fn find_message_in_room(&self, room: RoomId, id: MessageId) -> Result<Option<Message>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1 AND room_id = ?2"),
                params![id.to_string(), room.to_string()],
                row_to_message,
            )
            .optional()?)
    }

    /// Page of messages in ascending creation order. With `before`, only
    /// messages older than that message are returned; the page holds the
    /// newest `limit` of them.
    pub fn list_messages(
        &self,
        room: RoomId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT * FROM (
                 SELECT {MESSAGE_COLUMNS}, rowid AS seq FROM messages
                 WHERE room_id = ?1
                   AND (?2 IS NULL OR (created_at, rowid) <
                        (SELECT created_at, rowid FROM messages WHERE id = ?2))
                 ORDER BY created_at DESC, seq DESC
                 LIMIT ?3
             ) ORDER BY created_at ASC, seq ASC"
        ))?;

        let rows = stmt.query_map(
            params![room.to_string(), before.map(|b| b.to_string()), limit],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Lifetime number of messages `user` has sent, across all rooms.
    pub fn count_messages_by_sender(&self, user: UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE sender_id = ?1",
            params![user.0],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Delete a message only if it is in `room` and was sent by `sender`.
    pub fn delete_own_message(&self, room: RoomId, id: MessageId, sender: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE id = ?1 AND room_id = ?2 AND sender_id = ?3",
            params![id.to_string(), room.to_string(), sender.0],
        )?;
        Ok(affected > 0)
    }

    /// Replace the content of a message only if it is in `room` and was sent
    /// by `sender`. Returns the updated message.
    pub fn edit_own_message(
        &self,
        room: RoomId,
        id: MessageId,
        sender: UserId,
        content: &str,
    ) -> Result<Option<Message>> {
        let affected = self.conn().execute(
            "UPDATE messages SET content = ?1, is_edited = 1, updated_at = ?2
             WHERE id = ?3 AND room_id = ?4 AND sender_id = ?5",
            params![
                content,
                sql::fmt_ts(&sql::now()),
                id.to_string(),
                room.to_string(),
                sender.0,
            ],
        )?;
        if affected == 0 {
            return Ok(None);
        }
        self.get_message(id).map(Some)
    }

    // ------------------------------------------------------------------
    // Client views
    // ------------------------------------------------------------------

    /// Build the client-facing view of a stored message.
    pub fn to_payload(&self, message: &Message) -> Result<MessagePayload> {
        let sender = self.get_user(message.sender_id)?;
        let read_by = self.readers_of(message.id)?;

        let (image, video) = match message.kind {
            MessageKind::Image => (message.media_ref.clone(), None),
            MessageKind::Video => (None, message.media_ref.clone()),
            MessageKind::Text | MessageKind::System => (None, None),
        };

        Ok(MessagePayload {
            id: message.id,
            room: message.room_id,
            sender: UserRef {
                id: sender.id,
                username: sender.username,
            },
            message_type: message.kind,
            content: message.content.clone(),
            image,
            video,
            reply_to: message.reply_to,
            is_edited: message.is_edited,
            created_at: message.created_at,
            updated_at: message.updated_at,
            read_by,
        })
    }

    pub fn message_payload(&self, id: MessageId) -> Result<MessagePayload> {
        let message = self.get_message(id)?;
        self.to_payload(&message)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let room_str: String = row.get(1)?;
    let sender_id: i64 = row.get(2)?;
    let kind_str: String = row.get(3)?;
    let content: String = row.get(4)?;
    let media_ref: Option<String> = row.get(5)?;
    let reply_str: Option<String> = row.get(6)?;
    let is_edited: bool = row.get(7)?;
    let created_str: String = row.get(8)?;
    let updated_str: String = row.get(9)?;

    let kind = MessageKind::parse(&kind_str)
        .ok_or_else(|| sql::conversion(3, sql::UnknownVariant(kind_str.clone())))?;
    let reply_to = reply_str
        .map(|s| sql::parse_uuid(6, &s).map(MessageId))
        .transpose()?;

    Ok(Message {
        id: MessageId(sql::parse_uuid(0, &id_str)?),
        room_id: RoomId(sql::parse_uuid(1, &room_str)?),
        sender_id: UserId(sender_id),
        kind,
        content,
        media_ref,
        reply_to,
        is_edited,
        created_at: sql::parse_ts(8, &created_str)?,
        updated_at: sql::parse_ts(9, &updated_str)?,
    })
}
