//! Ephemeral typing indicators.

use chrono::{DateTime, Utc};
use rusqlite::params;

use tandem_shared::types::{RoomId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::TypingIndicator;
use crate::sql;

impl Database {
    /// Create the indicator or refresh its timestamp.
    pub fn upsert_typing(&self, room: RoomId, user: UserId) -> Result<()> {
        self.conn().execute(
            "INSERT INTO typing_indicators (room_id, user_id, started_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(room_id, user_id) DO UPDATE SET started_at = excluded.started_at",
            params![room.to_string(), user.0, sql::fmt_ts(&sql::now())],
        )?;
        Ok(())
    }

    /// Remove the indicator. Returns `false` if there was none.
    pub fn clear_typing(&self, room: RoomId, user: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM typing_indicators WHERE room_id = ?1 AND user_id = ?2",
            params![room.to_string(), user.0],
        )?;
        Ok(affected > 0)
    }

    pub fn typing_in_room(&self, room: RoomId) -> Result<Vec<TypingIndicator>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, started_at FROM typing_indicators
             WHERE room_id = ?1 ORDER BY started_at ASC",
        )?;
        let rows = stmt.query_map(params![room.to_string()], |row| {
            let user_id: i64 = row.get(0)?;
            let started_str: String = row.get(1)?;
            Ok(TypingIndicator {
                room_id: room,
                user_id: UserId(user_id),
                started_at: sql::parse_ts(1, &started_str)?,
            })
        })?;

        let mut indicators = Vec::new();
        for row in rows {
            indicators.push(row?);
        }
        Ok(indicators)
    }

    /// Delete indicators last refreshed before `cutoff`.
    pub fn purge_typing_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        Ok(self.conn().execute(
            "DELETE FROM typing_indicators WHERE started_at < ?1",
            params![sql::fmt_ts(&cutoff)],
        )?)
    }

    /// Drop every indicator. Run at startup alongside presence reset.
    pub fn clear_all_typing(&self) -> Result<usize> {
        Ok(self.conn().execute("DELETE FROM typing_indicators", [])?)
    }
}
