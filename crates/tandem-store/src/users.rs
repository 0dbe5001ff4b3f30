//! Users mirrored from the auth service.

use rusqlite::{params, OptionalExtension};

use tandem_shared::types::{Identity, UserId};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::User;
use crate::sql;

impl Database {
    /// Insert the user, or refresh the username of an existing row.
    pub fn upsert_user(&self, identity: &Identity) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET username = excluded.username",
            params![
                identity.user_id.0,
                identity.username,
                sql::fmt_ts(&sql::now()),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, username, created_at FROM users WHERE id = ?1",
                params![id.0],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// Return the ids from `ids` that have no user row.
    pub fn missing_users(&self, ids: &[UserId]) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare("SELECT 1 FROM users WHERE id = ?1")?;
        let mut missing = Vec::new();
        for id in ids {
            let found = stmt
                .query_row(params![id.0], |_| Ok(()))
                .optional()?
                .is_some();
            if !found {
                missing.push(*id);
            }
        }
        Ok(missing)
    }

    /// Delete a user. Memberships, messages and receipts cascade; rooms they
    /// created keep existing with no creator.
    pub fn delete_user(&self, id: UserId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id.0])?;
        Ok(affected > 0)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: i64 = row.get(0)?;
    let username: String = row.get(1)?;
    let created_str: String = row.get(2)?;

    Ok(User {
        id: UserId(id),
        username,
        created_at: sql::parse_ts(2, &created_str)?,
    })
}
