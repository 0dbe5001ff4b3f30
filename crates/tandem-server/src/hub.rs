//! Room fan-out.
//!
//! The hub owns every live connection's outbound queue. Connections are kept
//! in an arena keyed by [`ConnId`] with a room -> ids index next to it; a
//! publish serializes the event once and pushes the shared frame into each
//! queue in the room. Queues are bounded: a connection that cannot keep up
//! loses frames, the rest of the room does not wait for it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use tandem_shared::protocol::ServerEvent;
use tandem_shared::types::{RoomId, UserId};

/// Identifies one live connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One encoded event on its way to a connection.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub frame: Arc<str>,
    /// Connection that must not receive this frame (the one that caused it).
    pub exclude: Option<ConnId>,
}

impl Outbound {
    /// Whether this frame should be written to `conn`.
    pub fn is_for(&self, conn: ConnId) -> bool {
        self.exclude != Some(conn)
    }
}

struct ConnectionRecord {
    room: RoomId,
    user: UserId,
    tx: mpsc::Sender<Outbound>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnId, ConnectionRecord>,
    rooms: HashMap<RoomId, HashSet<ConnId>>,
}

#[derive(Clone)]
pub struct BroadcastHub {
    registry: Arc<RwLock<Registry>>,
    next_id: Arc<AtomicU64>,
    queue_capacity: usize,
}

impl BroadcastHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Add a connection to `room`. Returns its id and the queue the
    /// connection's writer drains.
    pub async fn register(&self, room: RoomId, user: UserId) -> (ConnId, mpsc::Receiver<Outbound>) {
        let id = ConnId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        let mut registry = self.registry.write().await;
        registry
            .connections
            .insert(id, ConnectionRecord { room, user, tx });
        let members = registry.rooms.entry(room).or_default();
        members.insert(id);

        info!(
            room = %room,
            user = %user,
            conn = %id,
            connections = members.len(),
            "Connection registered"
        );

        (id, rx)
    }

    /// Remove a connection. Unknown ids are ignored. Dropping the record
    /// closes the connection's queue once it is drained.
    pub async fn unregister(&self, room: RoomId, conn: ConnId) -> bool {
        let mut registry = self.registry.write().await;

        let Some(record) = registry.connections.remove(&conn) else {
            return false;
        };
        if record.room != room {
            debug!(conn = %conn, expected = %room, actual = %record.room, "Unregister with mismatched room");
        }

        let now_empty = match registry.rooms.get_mut(&record.room) {
            Some(members) => {
                members.remove(&conn);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            registry.rooms.remove(&record.room);
            debug!(room = %record.room, "Removed empty room channel");
        }

        info!(room = %record.room, user = %record.user, conn = %conn, "Connection unregistered");
        true
    }

    /// Deliver `event` to every connection in `room` (minus `exclude` at
    /// delivery time). Returns how many queues accepted the frame.
    pub async fn publish(
        &self,
        room: RoomId,
        event: &ServerEvent,
        exclude: Option<ConnId>,
    ) -> Result<usize, serde_json::Error> {
        let frame: Arc<str> = event.to_frame()?.into();
        Ok(self.publish_frame(room, Outbound { frame, exclude }).await)
    }

    pub async fn publish_frame(&self, room: RoomId, outbound: Outbound) -> usize {
        let registry = self.registry.read().await;
        let Some(members) = registry.rooms.get(&room) else {
            return 0;
        };

        let mut delivered = 0;
        for conn in members {
            let Some(record) = registry.connections.get(conn) else {
                continue;
            };
            if record.tx.try_send(outbound.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(
                    room = %room,
                    conn = %conn,
                    user = %record.user,
                    "Dropping frame for slow connection"
                );
            }
        }
        delivered
    }

    /// Queue `event` for one connection only.
    pub async fn send_to(&self, conn: ConnId, event: &ServerEvent) -> Result<bool, serde_json::Error> {
        let frame: Arc<str> = event.to_frame()?.into();
        let registry = self.registry.read().await;
        let Some(record) = registry.connections.get(&conn) else {
            return Ok(false);
        };
        Ok(record
            .tx
            .try_send(Outbound {
                frame,
                exclude: None,
            })
            .is_ok())
    }

    pub async fn connection_count(&self, room: RoomId) -> usize {
        self.registry
            .read()
            .await
            .rooms
            .get(&room)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub async fn room_count(&self) -> usize {
        self.registry.read().await.rooms.len()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing(user: i64) -> ServerEvent {
        ServerEvent::TypingIndicator {
            user_id: UserId(user),
            username: format!("user-{user}"),
            is_typing: true,
        }
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let hub = BroadcastHub::default();
        let room = RoomId::new();

        let (a, _rx_a) = hub.register(room, UserId(1)).await;
        let (b, _rx_b) = hub.register(room, UserId(2)).await;
        assert_ne!(a, b);
        assert_eq!(hub.connection_count(room).await, 2);

        assert!(hub.unregister(room, a).await);
        assert!(!hub.unregister(room, a).await);
        assert!(hub.unregister(room, b).await);
        assert_eq!(hub.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_publish_to_empty_room_is_noop() {
        let hub = BroadcastHub::default();
        assert_eq!(hub.publish(RoomId::new(), &typing(1), None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_publish_scoped_to_room() {
        let hub = BroadcastHub::default();
        let room = RoomId::new();
        let other = RoomId::new();

        let (_a, mut rx_a) = hub.register(room, UserId(1)).await;
        let (_b, mut rx_b) = hub.register(other, UserId(2)).await;

        assert_eq!(hub.publish(room, &typing(1), None).await.unwrap(), 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_exclude_marks_origin() {
        let hub = BroadcastHub::default();
        let room = RoomId::new();
        let (a, mut rx_a) = hub.register(room, UserId(1)).await;
        let (b, mut rx_b) = hub.register(room, UserId(2)).await;

        hub.publish(room, &typing(1), Some(a)).await.unwrap();

        let to_a = rx_a.try_recv().unwrap();
        let to_b = rx_b.try_recv().unwrap();
        assert!(!to_a.is_for(a));
        assert!(to_b.is_for(b));
    }

    #[tokio::test]
    async fn test_order_preserved_per_connection() {
        let hub = BroadcastHub::default();
        let room = RoomId::new();
        let (_a, mut rx) = hub.register(room, UserId(1)).await;

        for user in 0..10 {
            hub.publish(room, &typing(user), None).await.unwrap();
        }
        for user in 0..10 {
            let frame = rx.recv().await.unwrap().frame;
            assert!(frame.contains(&format!("\"user_id\":{user},")));
        }
    }

    #[tokio::test]
    async fn test_slow_connection_drops_frames() {
        let hub = BroadcastHub::new(2);
        let room = RoomId::new();
        let (_slow, mut slow_rx) = hub.register(room, UserId(1)).await;

        let delivered: usize = {
            let mut total = 0;
            for _ in 0..5 {
                total += hub.publish(room, &typing(2), None).await.unwrap();
            }
            total
        };
        assert_eq!(delivered, 2);

        assert!(slow_rx.try_recv().is_ok());
        assert!(slow_rx.try_recv().is_ok());
        assert!(slow_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_to_single_connection() {
        let hub = BroadcastHub::default();
        let room = RoomId::new();
        let (a, mut rx_a) = hub.register(room, UserId(1)).await;
        let (_b, mut rx_b) = hub.register(room, UserId(2)).await;

        assert!(hub.send_to(a, &ServerEvent::error("nope")).await.unwrap());
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());

        hub.unregister(room, a).await;
        assert!(!hub.send_to(a, &ServerEvent::error("nope")).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_register_and_publish() {
        let hub = BroadcastHub::default();
        let room = RoomId::new();

        let mut tasks = Vec::new();
        for user in 0..16 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                let (id, rx) = hub.register(room, UserId(user)).await;
                hub.publish(room, &typing(user), None).await.unwrap();
                hub.unregister(room, id).await;
                drop(rx);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(hub.connection_count(room).await, 0);
    }
}
