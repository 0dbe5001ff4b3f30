//! CRUD operations for [`ChatRoom`] records.

use rusqlite::params;

use tandem_shared::types::{RoomId, UserId};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{ChatRoom, MemberRole, RoomSummary, RoomType};
use crate::sql;

const ROOM_COLUMNS: &str = "id, name, room_type, created_by, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a room with `creator` as admin and every id in `members` as a
    /// regular member. Duplicate ids are collapsed.
    pub fn create_room(
        &self,
        name: Option<&str>,
        room_type: RoomType,
        creator: UserId,
        members: &[UserId],
    ) -> Result<ChatRoom> {
        let now = sql::now();
        let room = ChatRoom {
            id: RoomId::new(),
            name: name.map(str::to_owned),
            room_type,
            created_by: Some(creator),
            created_at: now,
            updated_at: now,
        };
        let ts = sql::fmt_ts(&now);

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO rooms (id, name, room_type, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                room.id.to_string(),
                room.name,
                room.room_type.as_str(),
                creator.0,
                ts,
            ],
        )?;

        {
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO memberships (room_id, user_id, role, last_seen, joined_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
            )?;
            insert.execute(params![
                room.id.to_string(),
                creator.0,
                MemberRole::Admin.as_str(),
                ts
            ])?;
            for member in members {
                insert.execute(params![
                    room.id.to_string(),
                    member.0,
                    MemberRole::Member.as_str(),
                    ts
                ])?;
            }
        }
        tx.commit()?;

        tracing::debug!(room = %room.id, creator = %creator, "room created");
        Ok(room)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_room(&self, id: RoomId) -> Result<ChatRoom> {
        self.conn()
            .query_row(
                &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?1"),
                params![id.to_string()],
                row_to_room,
            )
            .map_err(not_found)
    }

    /// Rooms `user` belongs to, most recently active first.
    pub fn list_rooms_for_user(&self, user: UserId) -> Result<Vec<RoomSummary>> {
        let mut stmt = self.conn().prepare(
            "SELECT r.id, r.name, r.room_type, r.created_by, r.created_at, r.updated_at,
                    (SELECT COUNT(*) FROM memberships m2 WHERE m2.room_id = r.id),
                    (SELECT COUNT(*) FROM memberships m3
                      WHERE m3.room_id = r.id AND m3.is_online = 1),
                    m.unread_count
             FROM rooms r
             JOIN memberships m ON m.room_id = r.id
             WHERE m.user_id = ?1
             ORDER BY r.updated_at DESC",
        )?;

        let rows = stmt.query_map(params![user.0], |row| {
            Ok(RoomSummary {
                room: row_to_room(row)?,
                total_members: row.get::<_, i64>(6)? as u64,
                online_count: row.get::<_, i64>(7)? as u64,
                unread_count: row.get(8)?,
            })
        })?;

        let mut rooms = Vec::new();
        for row in rows {
            rooms.push(row?);
        }
        Ok(rooms)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Bump the room's `updated_at` to now.
    pub fn touch_room(&self, id: RoomId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE rooms SET updated_at = ?1 WHERE id = ?2",
            params![sql::fmt_ts(&sql::now()), id.to_string()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a room by id. Returns `true` if a row was deleted.
    pub fn delete_room(&self, id: RoomId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM rooms WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map the leading [`ROOM_COLUMNS`] of a row to a [`ChatRoom`].
fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRoom> {
    let id_str: String = row.get(0)?;
    let name: Option<String> = row.get(1)?;
    let type_str: String = row.get(2)?;
    let created_by: Option<i64> = row.get(3)?;
    let created_str: String = row.get(4)?;
    let updated_str: String = row.get(5)?;

    let room_type = RoomType::parse(&type_str)
        .ok_or_else(|| sql::conversion(2, sql::UnknownVariant(type_str.clone())))?;

    Ok(ChatRoom {
        id: RoomId(sql::parse_uuid(0, &id_str)?),
        name,
        room_type,
        created_by: created_by.map(UserId),
        created_at: sql::parse_ts(4, &created_str)?,
        updated_at: sql::parse_ts(5, &updated_str)?,
    })
}
