#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use chrono::Utc;
use ed25519_dalek::SigningKey;
use futures::{SinkExt, StreamExt};
use rand::rngs::OsRng;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use tandem_server::api::{serve_listener, AppState};
use tandem_server::config::ServerConfig;
use tandem_shared::token::issue_access_token;
use tandem_shared::types::{Identity, RoomId, UserId};
use tandem_store::{RoomType, StoreHandle};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(3);
const QUIET_PERIOD: Duration = Duration::from_millis(250);

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub store: StoreHandle,
    key: SigningKey,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(ServerConfig::default()).await
    }

    pub async fn start_with(config: ServerConfig) -> Self {
        let (state, key) = app_state(config);
        let store = state.chat.store.clone();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_listener(state.clone(), listener));

        Self {
            addr,
            state,
            store,
            key,
        }
    }

    pub fn token(&self, id: i64) -> String {
        mint(&self.key, id)
    }

    /// Create a room owned by `creator` with `members`, registering every
    /// user first.
    pub async fn room(&self, room_type: RoomType, creator: i64, members: &[i64]) -> RoomId {
        let members: Vec<UserId> = members.iter().copied().map(UserId).collect();
        self.store
            .call(move |db| {
                db.upsert_user(&identity(creator))?;
                for member in &members {
                    db.upsert_user(&identity(member.0))?;
                }
                db.create_room(Some("test"), room_type, UserId(creator), &members)
            })
            .await
            .unwrap()
            .id
    }

    pub async fn connect_raw(&self, path_room: &str, token: &str) -> Ws {
        let url = format!("ws://{}/ws/chat/{}?token={}", self.addr, path_room, token);
        let (ws, _) = connect_async(url).await.unwrap();
        ws
    }

    /// Connect `user` to `room` and consume the user's own join announcement.
    pub async fn join(&self, room: RoomId, user: i64) -> Ws {
        let mut ws = self.connect_raw(&room.to_string(), &self.token(user)).await;
        let joined = next_event(&mut ws).await;
        assert_eq!(joined["type"], "user_status");
        assert_eq!(joined["user_id"], user);
        assert_eq!(joined["is_online"], true);
        ws
    }
}

pub fn identity(id: i64) -> Identity {
    Identity {
        user_id: UserId(id),
        username: format!("user-{id}"),
    }
}

pub fn mint(key: &SigningKey, id: i64) -> String {
    issue_access_token(&identity(id), Utc::now() + chrono::Duration::hours(1), key).encode()
}

/// App state wired to a fresh in-memory store and a freshly generated auth
/// key. Per-user event limits are lifted so tests can send freely.
pub fn app_state(mut config: ServerConfig) -> (AppState, SigningKey) {
    let key = SigningKey::generate(&mut OsRng);
    config.auth_server_pubkey = key.verifying_key().to_bytes();
    config.event_rate = 1000.0;
    config.event_burst = 1000.0;

    let store = StoreHandle::open_in_memory().unwrap();
    (AppState::new(config, store), key)
}

pub async fn send(ws: &mut Ws, event: Value) {
    ws.send(Message::Text(event.to_string())).await.unwrap();
}

/// Next JSON event on the socket. Panics on timeout or close.
pub async fn next_event(ws: &mut Ws) -> Value {
    loop {
        let frame = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for an event");
        match frame {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

/// Assert that no text frame arrives for a short while.
pub async fn expect_silence(ws: &mut Ws) {
    match tokio::time::timeout(QUIET_PERIOD, ws.next()).await {
        Err(_) => {}
        Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected event: {text}"),
        Ok(other) => panic!("unexpected socket activity: {other:?}"),
    }
}

/// Assert the server ends the connection without sending any event.
pub async fn expect_closed(ws: &mut Ws) {
    loop {
        let frame = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("connection was not closed");
        match frame {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("unexpected payload before close: {other:?}"),
        }
    }
}
