//! Read receipts: one row per (message, user), created at most once.

use rusqlite::params;

use tandem_shared::protocol::UserRef;
use tandem_shared::types::{MessageId, RoomId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::ReadReceipt;
use crate::sql;

/// Result of [`Database::mark_read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The message is not in the room (or does not exist).
    UnknownMessage,
    /// The receipt already existed; nothing changed.
    AlreadyRead,
    /// A new receipt was written.
    Marked {
        /// Whether the reader's unread counter was decremented.
        unread_decremented: bool,
    },
}

impl Database {
    /// Record that `user` read `message` in `room`.
    ///
    /// The receipt insert and the unread decrement share a transaction, and
    /// the decrement only happens when the receipt is new, so repeated reads
    /// of the same message never drain the counter twice.
    pub fn mark_read(&self, room: RoomId, message: MessageId, user: UserId) -> Result<ReadOutcome> {
        let tx = self.conn().unchecked_transaction()?;

        if self.find_message_in_room(room, message)?.is_none() {
            return Ok(ReadOutcome::UnknownMessage);
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
             VALUES (?1, ?2, ?3)",
            params![message.to_string(), user.0, sql::fmt_ts(&sql::now())],
        )?;
        if inserted == 0 {
            return Ok(ReadOutcome::AlreadyRead);
        }

        let unread_decremented = self.decrement_unread(room, user)?;
        tx.commit()?;

        Ok(ReadOutcome::Marked { unread_decremented })
    }

    pub fn read_receipts(&self, message: MessageId) -> Result<Vec<ReadReceipt>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, read_at FROM message_reads
             WHERE message_id = ?1 ORDER BY read_at ASC, user_id ASC",
        )?;
        let rows = stmt.query_map(params![message.to_string()], |row| {
            let user_id: i64 = row.get(0)?;
            let read_str: String = row.get(1)?;
            Ok(ReadReceipt {
                message_id: message,
                user_id: UserId(user_id),
                read_at: sql::parse_ts(1, &read_str)?,
            })
        })?;

        let mut receipts = Vec::new();
        for row in rows {
            receipts.push(row?);
        }
        Ok(receipts)
    }

    /// Users who have read `message`, in reading order.
    pub fn readers_of(&self, message: MessageId) -> Result<Vec<UserRef>> {
        let mut stmt = self.conn().prepare(
            "SELECT u.id, u.username FROM message_reads r
             JOIN users u ON u.id = r.user_id
             WHERE r.message_id = ?1
             ORDER BY r.read_at ASC, u.id ASC",
        )?;
        let rows = stmt.query_map(params![message.to_string()], |row| {
            Ok(UserRef {
                id: UserId(row.get(0)?),
                username: row.get(1)?,
            })
        })?;

        let mut readers = Vec::new();
        for row in rows {
            readers.push(row?);
        }
        Ok(readers)
    }
}
