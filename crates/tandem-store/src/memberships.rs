//! Room membership, presence flags and unread counters.
//!
//! Every mutation here is a single SQL statement, so concurrent callers
//! cannot lose each other's updates.

use rusqlite::{params, OptionalExtension};

use tandem_shared::types::{RoomId, UserId};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{MemberRole, Membership};
use crate::sql;

impl Database {
    /// Add `user` to `room`. Returns `false` if they were already a member.
    pub fn add_member(&self, room: RoomId, user: UserId, role: MemberRole) -> Result<bool> {
        let ts = sql::fmt_ts(&sql::now());
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO memberships (room_id, user_id, role, last_seen, joined_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![room.to_string(), user.0, role.as_str(), ts],
        )?;
        Ok(affected > 0)
    }

    pub fn remove_member(&self, room: RoomId, user: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM memberships WHERE room_id = ?1 AND user_id = ?2",
            params![room.to_string(), user.0],
        )?;
        Ok(affected > 0)
    }

    pub fn is_member(&self, room: RoomId, user: UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM memberships WHERE room_id = ?1 AND user_id = ?2",
                params![room.to_string(), user.0],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_membership(&self, room: RoomId, user: UserId) -> Result<Membership> {
        self.conn()
            .query_row(
                "SELECT room_id, user_id, role, is_online, last_seen, joined_at, unread_count
                 FROM memberships WHERE room_id = ?1 AND user_id = ?2",
                params![room.to_string(), user.0],
                row_to_membership,
            )
            .map_err(not_found)
    }

    pub fn member_ids(&self, room: RoomId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM memberships WHERE room_id = ?1 ORDER BY joined_at ASC, user_id ASC",
        )?;
        let rows = stmt.query_map(params![room.to_string()], |row| row.get::<_, i64>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(UserId(row?));
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------

    /// Set the online flag and refresh `last_seen`. Returns `false` (and
    /// changes nothing) when the user is not a member of the room.
    pub fn set_online(&self, room: RoomId, user: UserId, online: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE memberships SET is_online = ?1, last_seen = ?2
             WHERE room_id = ?3 AND user_id = ?4",
            params![online, sql::fmt_ts(&sql::now()), room.to_string(), user.0],
        )?;
        Ok(affected > 0)
    }

    pub fn online_count(&self, room: RoomId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM memberships WHERE room_id = ?1 AND is_online = 1",
            params![room.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Optionally set the online flag, then read the room's online count,
    /// in one transaction. A failure leaves the flag untouched.
    pub fn presence_transition(
        &self,
        room: RoomId,
        user: UserId,
        online: Option<bool>,
    ) -> Result<u64> {
        let tx = self.conn().unchecked_transaction()?;
        if let Some(online) = online {
            self.set_online(room, user, online)?;
        }
        let count = self.online_count(room)?;
        tx.commit()?;
        Ok(count)
    }

    /// Mark every member of every room offline. Run at startup: no
    /// connection survives a restart.
    pub fn reset_presence(&self) -> Result<usize> {
        Ok(self
            .conn()
            .execute("UPDATE memberships SET is_online = 0 WHERE is_online = 1", [])?)
    }

    // ------------------------------------------------------------------
    // Unread counters
    // ------------------------------------------------------------------

    /// Increment `unread_count` for every member of `room` except `sender`.
    /// Returns the number of memberships touched.
    pub fn increment_unread_except(&self, room: RoomId, sender: UserId) -> Result<usize> {
        Ok(self.conn().execute(
            "UPDATE memberships SET unread_count = unread_count + 1
             WHERE room_id = ?1 AND user_id != ?2",
            params![room.to_string(), sender.0],
        )?)
    }

    /// Decrement `user`'s unread counter if it is positive.
    pub fn decrement_unread(&self, room: RoomId, user: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE memberships SET unread_count = unread_count - 1
             WHERE room_id = ?1 AND user_id = ?2 AND unread_count > 0",
            params![room.to_string(), user.0],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_membership(row: &rusqlite::Row<'_>) -> rusqlite::Result<Membership> {
    let room_str: String = row.get(0)?;
    let user_id: i64 = row.get(1)?;
    let role_str: String = row.get(2)?;
    let is_online: bool = row.get(3)?;
    let last_seen_str: String = row.get(4)?;
    let joined_str: String = row.get(5)?;
    let unread_count: u32 = row.get(6)?;

    let role = MemberRole::parse(&role_str)
        .ok_or_else(|| sql::conversion(2, sql::UnknownVariant(role_str.clone())))?;

    Ok(Membership {
        room_id: RoomId(sql::parse_uuid(0, &room_str)?),
        user_id: UserId(user_id),
        role,
        is_online,
        last_seen: sql::parse_ts(4, &last_seen_str)?,
        joined_at: sql::parse_ts(5, &joined_str)?,
        unread_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::models::RoomType;

    #[test]
    fn set_online_updates_flag_and_count() {
        let db = fixtures::db_with_users(&[1, 2]);
        let room = db.create_room(None, RoomType::Private, UserId(1), &[UserId(2)]).unwrap();
        let before = db.get_membership(room.id, UserId(1)).unwrap();

        assert!(db.set_online(room.id, UserId(1), true).unwrap());
        assert_eq!(db.online_count(room.id).unwrap(), 1);
        assert!(db.set_online(room.id, UserId(2), true).unwrap());
        assert_eq!(db.online_count(room.id).unwrap(), 2);

        assert!(db.set_online(room.id, UserId(1), false).unwrap());
        assert_eq!(db.online_count(room.id).unwrap(), 1);

        let after = db.get_membership(room.id, UserId(1)).unwrap();
        assert!(!after.is_online);
        assert!(after.last_seen >= before.last_seen);
    }

    #[test]
    fn set_online_for_non_member_is_noop() {
        let db = fixtures::db_with_users(&[1, 2, 3]);
        let room = db.create_room(None, RoomType::Private, UserId(1), &[UserId(2)]).unwrap();

        assert!(!db.set_online(room.id, UserId(3), true).unwrap());
        assert_eq!(db.online_count(room.id).unwrap(), 0);
    }

    #[test]
    fn failed_presence_transition_leaves_flag_alone() {
        let db = fixtures::db_with_users(&[1, 2]);
        let room = db.create_room(None, RoomType::Private, UserId(1), &[UserId(2)]).unwrap();

        assert_eq!(db.presence_transition(room.id, UserId(1), Some(true)).unwrap(), 1);
        assert_eq!(db.presence_transition(room.id, UserId(1), None).unwrap(), 1);

        db.conn()
            .execute_batch(
                "CREATE TRIGGER no_presence BEFORE UPDATE ON memberships
                 BEGIN SELECT RAISE(ABORT, 'presence writes disabled'); END;",
            )
            .unwrap();
        assert!(db.presence_transition(room.id, UserId(2), Some(true)).is_err());
        assert!(!db.get_membership(room.id, UserId(2)).unwrap().is_online);
        assert_eq!(db.online_count(room.id).unwrap(), 1);
    }

    #[test]
    fn unread_increments_skip_sender_and_decrement_floors_at_zero() {
        let db = fixtures::db_with_users(&[1, 2, 3]);
        let room = db
            .create_room(None, RoomType::Group, UserId(1), &[UserId(2), UserId(3)])
            .unwrap();

        assert_eq!(db.increment_unread_except(room.id, UserId(1)).unwrap(), 2);
        assert_eq!(db.get_membership(room.id, UserId(1)).unwrap().unread_count, 0);
        assert_eq!(db.get_membership(room.id, UserId(2)).unwrap().unread_count, 1);

        assert!(db.decrement_unread(room.id, UserId(2)).unwrap());
        assert!(!db.decrement_unread(room.id, UserId(2)).unwrap());
        assert_eq!(db.get_membership(room.id, UserId(2)).unwrap().unread_count, 0);
    }

    #[test]
    fn add_and_remove_member() {
        let db = fixtures::db_with_users(&[1, 2]);
        let room = db.create_room(None, RoomType::Group, UserId(1), &[]).unwrap();

        assert!(db.add_member(room.id, UserId(2), MemberRole::Member).unwrap());
        assert!(!db.add_member(room.id, UserId(2), MemberRole::Admin).unwrap());
        assert_eq!(db.member_ids(room.id).unwrap(), vec![UserId(1), UserId(2)]);

        assert!(db.remove_member(room.id, UserId(2)).unwrap());
        assert!(!db.is_member(room.id, UserId(2)).unwrap());
    }

    #[test]
    fn reset_presence_clears_everyone() {
        let db = fixtures::db_with_users(&[1, 2]);
        let room = db.create_room(None, RoomType::Private, UserId(1), &[UserId(2)]).unwrap();
        db.set_online(room.id, UserId(1), true).unwrap();
        db.set_online(room.id, UserId(2), true).unwrap();

        assert_eq!(db.reset_presence().unwrap(), 2);
        assert_eq!(db.online_count(room.id).unwrap(), 0);
    }
}
