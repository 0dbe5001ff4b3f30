//! Per-room online state.
//!
//! A user may hold several connections to the same room (two tabs, phone and
//! laptop). The membership row's online flag follows the number of live
//! connections: it flips on with the first and off with the last. Every
//! transition for a given (room, user) runs under that key's lock, so a
//! connect racing a disconnect can never leave the flag stale.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use tandem_shared::types::{RoomId, UserId};
use tandem_store::{Result, StoreHandle};

type PresenceKey = (RoomId, UserId);

/// Room state after a connect or disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceUpdate {
    /// Members of the room currently online.
    pub online_count: u64,
    /// Live connections the user still holds in the room.
    pub connections: usize,
}

impl PresenceUpdate {
    pub fn user_online(&self) -> bool {
        self.connections > 0
    }
}

#[derive(Clone)]
pub struct PresenceTracker {
    store: StoreHandle,
    /// Live connection count per key. Entries exist only while count > 0 or
    /// while a transition for the key is in flight.
    live: Arc<Mutex<HashMap<PresenceKey, Arc<Mutex<usize>>>>>,
}

impl PresenceTracker {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            store,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn slot(&self, key: PresenceKey) -> Arc<Mutex<usize>> {
        let mut live = self.live.lock().await;
        Arc::clone(live.entry(key).or_default())
    }

    /// Record a new connection. On error nothing changes: the connection is
    /// not counted and the online flag keeps its previous value.
    pub async fn connect(&self, room: RoomId, user: UserId) -> Result<PresenceUpdate> {
        let key = (room, user);
        let slot = self.slot(key).await;
        let mut count = slot.lock().await;

        let flip = (*count == 0).then_some(true);
        let online_count = match self
            .store
            .call(move |db| db.presence_transition(room, user, flip))
            .await
        {
            Ok(online_count) => online_count,
            Err(e) => {
                if *count == 0 {
                    self.forget_if_idle(key, &slot).await;
                }
                return Err(e);
            }
        };

        *count += 1;
        debug!(room = %room, user = %user, connections = *count, "Presence connect");
        Ok(PresenceUpdate {
            online_count,
            connections: *count,
        })
    }

    /// Record a closed connection. The connection is uncounted even if the
    /// store write fails; startup resets any flag left behind.
    pub async fn disconnect(&self, room: RoomId, user: UserId) -> Result<PresenceUpdate> {
        let key = (room, user);
        let slot = self.slot(key).await;
        let mut count = slot.lock().await;

        *count = count.saturating_sub(1);
        let connections = *count;
        debug!(room = %room, user = %user, connections, "Presence disconnect");

        let flip = (connections == 0).then_some(false);
        let result = self
            .store
            .call(move |db| db.presence_transition(room, user, flip))
            .await;

        if connections == 0 {
            self.forget_if_idle(key, &slot).await;
        }
        drop(count);

        Ok(PresenceUpdate {
            online_count: result?,
            connections,
        })
    }

    /// Drop the slot for `key` unless another task is waiting on it. Call
    /// with the slot locked and its count at zero.
    async fn forget_if_idle(&self, key: PresenceKey, slot: &Arc<Mutex<usize>>) {
        let mut live = self.live.lock().await;
        // Only the map and the caller hold the slot.
        if Arc::strong_count(slot) == 2 {
            live.remove(&key);
        }
    }

    /// Set the membership row's online flag directly. Returns `false` when
    /// the user is not a member of the room.
    pub async fn set_online(&self, room: RoomId, user: UserId, online: bool) -> Result<bool> {
        let key = (room, user);
        let slot = self.slot(key).await;
        let count = slot.lock().await;
        let result = self
            .store
            .call(move |db| db.set_online(room, user, online))
            .await;
        if *count == 0 {
            self.forget_if_idle(key, &slot).await;
        }
        result
    }

    pub async fn online_count(&self, room: RoomId) -> Result<u64> {
        self.store.call(move |db| db.online_count(room)).await
    }

    /// Live connections held by `user` in `room`.
    pub async fn connections(&self, room: RoomId, user: UserId) -> usize {
        let slot = {
            let live = self.live.lock().await;
            match live.get(&(room, user)) {
                Some(slot) => Arc::clone(slot),
                None => return 0,
            }
        };
        let count = slot.lock().await;
        *count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_shared::types::Identity;
    use tandem_store::RoomType;

    async fn setup() -> (PresenceTracker, RoomId) {
        let store = StoreHandle::open_in_memory().unwrap();
        let room = store
            .call(|db| {
                for id in 1..=3 {
                    db.upsert_user(&Identity {
                        user_id: UserId(id),
                        username: format!("user-{id}"),
                    })?;
                }
                db.create_room(None, RoomType::Group, UserId(1), &[UserId(2), UserId(3)])
            })
            .await
            .unwrap();
        (PresenceTracker::new(store), room.id)
    }

    #[tokio::test]
    async fn test_connect_counts_each_user_once() {
        let (presence, room) = setup().await;

        assert_eq!(presence.connect(room, UserId(1)).await.unwrap().online_count, 1);
        assert_eq!(presence.connect(room, UserId(2)).await.unwrap().online_count, 2);
        // Second tab for user 1.
        let update = presence.connect(room, UserId(1)).await.unwrap();
        assert_eq!(
            update,
            PresenceUpdate {
                online_count: 2,
                connections: 2
            }
        );
        assert_eq!(presence.connections(room, UserId(1)).await, 2);
    }

    #[tokio::test]
    async fn test_offline_only_after_last_connection() {
        let (presence, room) = setup().await;
        presence.connect(room, UserId(1)).await.unwrap();
        presence.connect(room, UserId(1)).await.unwrap();

        let first = presence.disconnect(room, UserId(1)).await.unwrap();
        assert!(first.user_online());
        assert_eq!(first.online_count, 1);

        let last = presence.disconnect(room, UserId(1)).await.unwrap();
        assert!(!last.user_online());
        assert_eq!(last.online_count, 0);
        assert_eq!(presence.connections(room, UserId(1)).await, 0);
        assert!(presence.live.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_non_member_never_counted() {
        let (presence, room) = setup().await;
        assert_eq!(presence.connect(room, UserId(99)).await.unwrap().online_count, 0);
        assert!(!presence.set_online(room, UserId(99), true).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_counted() {
        let (presence, room) = setup().await;
        presence
            .store
            .call(|db| {
                db.conn().execute_batch(
                    "CREATE TRIGGER no_presence BEFORE UPDATE ON memberships
                     BEGIN SELECT RAISE(ABORT, 'presence writes disabled'); END;",
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(presence.connect(room, UserId(2)).await.is_err());
        assert_eq!(presence.connections(room, UserId(2)).await, 0);
        assert!(presence.live.lock().await.is_empty());
        assert_eq!(presence.online_count(room).await.unwrap(), 0);

        presence
            .store
            .call(|db| {
                db.conn().execute_batch("DROP TRIGGER no_presence")?;
                Ok(())
            })
            .await
            .unwrap();

        let update = presence.connect(room, UserId(2)).await.unwrap();
        assert_eq!(update.connections, 1);
        assert_eq!(update.online_count, 1);
        let last = presence.disconnect(room, UserId(2)).await.unwrap();
        assert!(!last.user_online());
        assert_eq!(last.online_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_connect_disconnect() {
        let (presence, room) = setup().await;

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let presence = presence.clone();
            tasks.push(tokio::spawn(async move {
                presence.connect(room, UserId(3)).await.unwrap();
                presence.disconnect(room, UserId(3)).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(presence.online_count(room).await.unwrap(), 0);
        assert_eq!(presence.connections(room, UserId(3)).await, 0);
    }
}
