//! WebSocket entry point: `GET /ws/chat/:room_id?token=...`.
//!
//! The upgrade is always accepted. Authentication and the membership check
//! run on the upgraded socket, and a rejected connection is closed without
//! any payload so clients cannot probe which rooms exist.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tandem_shared::constants::{MAX_FRAME_SIZE, TOKEN_QUERY_PARAM};
use tandem_shared::types::{Identity, RoomId};

use crate::api::AppState;
use crate::hub::{ConnId, Outbound};
use crate::session::RoomSession;

const WRITER_GRACE: Duration = Duration::from_secs(1);

pub async fn ws_chat(
    ws: WebSocketUpgrade,
    Path(raw_room): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    let token = params.get(TOKEN_QUERY_PARAM).cloned().unwrap_or_default();
    ws.max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, raw_room, token))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, raw_room: String, token: String) {
    let Some((identity, room)) = admit(&state, &raw_room, &token).await else {
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    let mut session = RoomSession::new(state.chat.clone(), identity, room);
    let (conn, outbound) = match session.open().await {
        Ok(opened) => opened,
        Err(e) => {
            debug!(room = %room, error = %e, "Rejecting connection");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (sink, mut stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, outbound, conn));
    let mut writer_done = false;

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = session.handle_frame(&text).await {
                        if e.is_fatal() {
                            warn!(room = %room, conn = %conn, error = %e, "Session fault");
                            break;
                        }
                        warn!(room = %room, conn = %conn, error = %e, "Event dropped");
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Pings are answered by the transport; binary frames carry nothing for us.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(room = %room, conn = %conn, error = %e, "Socket read failed");
                    break;
                }
            },
            _ = &mut writer => {
                debug!(room = %room, conn = %conn, "Writer finished, closing session");
                writer_done = true;
                break;
            }
        }
    }

    session.close().await;

    // Unregistering closed the queue; give the writer a moment to flush the
    // close frame before tearing it down.
    if !writer_done && tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
}

/// Resolve the token and room id. Any failure means the connection is
/// dropped silently.
async fn admit(state: &AppState, raw_room: &str, token: &str) -> Option<(Identity, RoomId)> {
    let identity = match state.verifier.verify(token) {
        Ok(identity) => identity,
        Err(e) => {
            debug!(error = %e, "Rejecting unauthenticated connection");
            return None;
        }
    };

    let Ok(room) = raw_room.parse::<RoomId>() else {
        debug!(user = %identity.user_id, room = raw_room, "Rejecting connection to malformed room id");
        return None;
    };

    let row = identity.clone();
    if let Err(e) = state.chat.store.call(move |db| db.upsert_user(&row)).await {
        warn!(user = %identity.user_id, error = %e, "Failed to record user");
        return None;
    }

    info!(user = %identity.user_id, room = %room, "Connection authenticated");
    Some((identity, room))
}

/// Drain the hub queue into the socket, skipping frames aimed at everyone
/// but this connection.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    conn: ConnId,
) {
    while let Some(out) = outbound.recv().await {
        if !out.is_for(conn) {
            continue;
        }
        if let Err(e) = sink.send(Message::Text(out.frame.to_string())).await {
            debug!(conn = %conn, error = %e, "Socket write failed");
            break;
        }
    }
    let _ = sink.close().await;
}
