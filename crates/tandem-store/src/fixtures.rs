//! Seed helpers for unit tests.

use tandem_shared::types::{Identity, UserId};

use crate::database::Database;

/// In-memory database with users `user-<id>` for every id.
pub(crate) fn db_with_users(ids: &[i64]) -> Database {
    let db = Database::open_in_memory().expect("in-memory database");
    for id in ids {
        db.upsert_user(&Identity {
            user_id: UserId(*id),
            username: format!("user-{id}"),
        })
        .expect("seed user");
    }
    db
}
