//! Subscription status as reported by the billing service.

use rusqlite::{params, OptionalExtension};

use tandem_shared::types::UserId;

use crate::database::Database;
use crate::error::Result;
use crate::sql;

impl Database {
    /// Whether `user` currently has an active subscription. Users the
    /// billing service never reported are treated as unsubscribed.
    pub fn has_active_subscription(&self, user: UserId) -> Result<bool> {
        let active: Option<bool> = self
            .conn()
            .query_row(
                "SELECT is_active FROM subscriptions WHERE user_id = ?1",
                params![user.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(active.unwrap_or(false))
    }

    pub fn set_subscription(&self, user: UserId, active: bool) -> Result<()> {
        self.conn().execute(
            "INSERT INTO subscriptions (user_id, is_active, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                 is_active = excluded.is_active,
                 updated_at = excluded.updated_at",
            params![user.0, active, sql::fmt_ts(&sql::now())],
        )?;
        Ok(())
    }
}
