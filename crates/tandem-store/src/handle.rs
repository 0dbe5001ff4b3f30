//! Async access to the [`Database`].
//!
//! `rusqlite::Connection` is blocking and not `Sync`, so the handle keeps it
//! behind a mutex and runs every call on tokio's blocking pool. Callers in
//! async code get a future that resolves once the statement finished without
//! ever parking a runtime worker thread on SQLite I/O.

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::database::Database;
use crate::error::{Result, StoreError};

#[derive(Clone)]
pub struct StoreHandle {
    db: Arc<Mutex<Database>>,
}

impl StoreHandle {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        Database::open_at(path).map(Self::new)
    }

    pub fn open_in_memory() -> Result<Self> {
        Database::open_in_memory().map(Self::new)
    }

    /// Run `f` against the database on the blocking worker pool.
    ///
    /// The closure runs to completion even if the returned future is dropped,
    /// so a caller that goes away mid-call never leaves a half-applied write.
    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| StoreError::Poisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewMessage, RoomType};
    use tandem_shared::types::{Identity, UserId};

    #[tokio::test]
    async fn call_runs_on_blocking_pool() {
        let store = StoreHandle::open_in_memory().unwrap();
        store
            .call(|db| {
                db.upsert_user(&Identity {
                    user_id: UserId(1),
                    username: "ada".into(),
                })
            })
            .await
            .unwrap();

        let user = store.call(|db| db.get_user(UserId(1))).await.unwrap();
        assert_eq!(user.username, "ada");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let store = StoreHandle::open_in_memory().unwrap();
        let room_id = store
            .call(|db| {
                for id in 1..=4 {
                    db.upsert_user(&Identity {
                        user_id: UserId(id),
                        username: format!("user-{id}"),
                    })?;
                }
                db.create_room(None, RoomType::Group, UserId(1), &[UserId(2), UserId(3), UserId(4)])
            })
            .await
            .unwrap()
            .id;

        let mut tasks = Vec::new();
        for sender in 1..=3 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..10 {
                    store
                        .call(move |db| db.record_chat_message(&NewMessage::text(room_id, UserId(sender), "x")))
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // user 4 never sent, so it saw all 30 messages
        let unread = store
            .call(move |db| db.get_membership(room_id, UserId(4)))
            .await
            .unwrap()
            .unread_count;
        assert_eq!(unread, 30);
    }
}
