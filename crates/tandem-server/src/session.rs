//! Room sessions.
//!
//! One [`RoomSession`] exists per live connection. It owns the bound
//! identity and room, turns inbound client events into store mutations, and
//! hands the resulting outbound events to the [`BroadcastHub`].
//!
//! Each handler maps an event to a [`Reaction`]; the session applies the
//! reaction afterwards. Handlers never touch the hub directly, which keeps
//! gating and persistence decisions testable on their own.
//!
//! Lifecycle: `Connecting -> Active -> Closing -> Closed`. Cleanup runs
//! exactly once, on the first call to [`RoomSession::close`].

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tandem_shared::constants::{QUOTA_EXCEEDED_MESSAGE, RATE_LIMITED_MESSAGE};
use tandem_shared::protocol::{ClientEvent, ServerEvent};
use tandem_shared::types::{Identity, MessageId, RoomId, UserId};
use tandem_store::{ChatOutcome, NewMessage, ReadOutcome, StoreHandle};

use crate::config::ServerConfig;
use crate::error::SessionError;
use crate::hub::{BroadcastHub, ConnId, Outbound};
use crate::presence::PresenceTracker;
use crate::rate_limit::RateLimiter;
use crate::subscription::SubscriptionGate;

// ---------------------------------------------------------------------------
// Shared services
// ---------------------------------------------------------------------------

/// Everything a session needs from the rest of the server. Cheap to clone.
#[derive(Clone)]
pub struct ChatServices {
    pub store: StoreHandle,
    pub hub: BroadcastHub,
    pub presence: PresenceTracker,
    pub subscriptions: SubscriptionGate,
    pub event_limiter: RateLimiter<UserId>,
    pub free_message_limit: u64,
}

impl ChatServices {
    pub fn new(store: StoreHandle, config: &ServerConfig) -> Self {
        Self {
            hub: BroadcastHub::new(config.outbound_queue_capacity),
            presence: PresenceTracker::new(store.clone()),
            subscriptions: SubscriptionGate::new(store.clone(), config.subscription_cache_ttl),
            event_limiter: RateLimiter::new(config.event_rate, config.event_burst),
            free_message_limit: config.free_message_limit,
            store,
        }
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// What a handled event asks the session to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    Nothing,
    /// Send to the originating connection only.
    Reply(ServerEvent),
    /// Publish to the whole room, optionally skipping the originating
    /// connection.
    Broadcast {
        event: ServerEvent,
        exclude_self: bool,
    },
}

impl Reaction {
    fn to_room(event: ServerEvent) -> Self {
        Self::Broadcast {
            event,
            exclude_self: false,
        }
    }

    fn to_others(event: ServerEvent) -> Self {
        Self::Broadcast {
            event,
            exclude_self: true,
        }
    }
}

pub struct RoomSession {
    services: ChatServices,
    identity: Identity,
    room: RoomId,
    conn: Option<ConnId>,
    state: SessionState,
}

impl RoomSession {
    pub fn new(services: ChatServices, identity: Identity, room: RoomId) -> Self {
        Self {
            services,
            identity,
            room,
            conn: None,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn conn_id(&self) -> Option<ConnId> {
        self.conn
    }

    pub fn room(&self) -> RoomId {
        self.room
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Admit the connection: check membership, register with the hub, mark
    /// the user online and announce the join. Returns the connection's
    /// outbound queue.
    pub async fn open(&mut self) -> Result<(ConnId, mpsc::Receiver<Outbound>), SessionError> {
        if self.state != SessionState::Connecting {
            return Err(SessionError::NotActive(self.state));
        }

        let (room, user) = (self.room, self.identity.user_id);
        let is_member = self
            .services
            .store
            .call(move |db| db.is_member(room, user))
            .await?;
        if !is_member {
            self.state = SessionState::Closed;
            return Err(SessionError::MembershipDenied { room, user });
        }

        let (conn, outbound) = self.services.hub.register(room, user).await;
        self.conn = Some(conn);

        let online_count = match self.services.presence.connect(room, user).await {
            Ok(update) => update.online_count,
            Err(e) => {
                self.services.hub.unregister(room, conn).await;
                self.state = SessionState::Closed;
                return Err(e.into());
            }
        };
        self.state = SessionState::Active;

        info!(
            room = %room,
            user = %user,
            conn = %conn,
            online_count,
            "Session active"
        );

        self.apply(Reaction::to_room(ServerEvent::UserStatus {
            user_id: user,
            username: self.identity.username.clone(),
            is_online: true,
            online_count,
        }))
        .await?;

        Ok((conn, outbound))
    }

    /// Process one inbound text frame end to end. Unknown tags are ignored.
    pub async fn handle_frame(&mut self, frame: &str) -> Result<(), SessionError> {
        if self.state != SessionState::Active {
            return Err(SessionError::NotActive(self.state));
        }

        let Some(event) = ClientEvent::parse(frame)? else {
            debug!(room = %self.room, user = %self.identity.user_id, "Ignoring unknown event");
            return Ok(());
        };

        if !self
            .services
            .event_limiter
            .check(self.identity.user_id)
            .await
        {
            warn!(
                room = %self.room,
                user = %self.identity.user_id,
                event = event.tag(),
                "Event rate limit exceeded"
            );
            return self
                .apply(Reaction::Reply(ServerEvent::error(RATE_LIMITED_MESSAGE)))
                .await;
        }

        let reaction = self.dispatch(event).await?;
        self.apply(reaction).await
    }

    /// Decide what `event` does. Persistence happens here; delivery happens
    /// in [`Self::apply`].
    pub async fn dispatch(&self, event: ClientEvent) -> Result<Reaction, SessionError> {
        debug!(
            room = %self.room,
            user = %self.identity.user_id,
            event = event.tag(),
            "Dispatching event"
        );

        match event {
            ClientEvent::ChatMessage { content, reply_to } => {
                self.on_chat_message(content, reply_to).await
            }
            ClientEvent::TypingStart => self.on_typing(true).await,
            ClientEvent::TypingStop => self.on_typing(false).await,
            ClientEvent::MessageRead { message_id } => self.on_message_read(message_id).await,
            ClientEvent::DeleteMessage { message_id } => self.on_delete(message_id).await,
            ClientEvent::EditMessage {
                message_id,
                content,
            } => self.on_edit(message_id, content).await,
        }
    }

    async fn on_chat_message(
        &self,
        content: String,
        reply_to: Option<String>,
    ) -> Result<Reaction, SessionError> {
        if content.trim().is_empty() {
            return Ok(Reaction::Nothing);
        }

        let (room, user) = (self.room, self.identity.user_id);
        let allowance = self.allowance(user).await?;

        let outcome = self
            .services
            .store
            .call(move |db| {
                let reply_to = match reply_to {
                    Some(raw) => db.resolve_reply_target(room, &raw)?,
                    None => None,
                };
                let new = NewMessage::text(room, user, content).replying_to(reply_to);
                match db.record_chat_message_within(&new, allowance)? {
                    ChatOutcome::Recorded(message) => db.to_payload(&message).map(Some),
                    ChatOutcome::QuotaExceeded { .. } => Ok(None),
                }
            })
            .await?;

        let Some(payload) = outcome else {
            info!(room = %room, user = %user, "Free message quota exhausted");
            return Ok(Reaction::Reply(ServerEvent::error(QUOTA_EXCEEDED_MESSAGE)));
        };

        debug!(room = %room, user = %user, message = %payload.id, "Message stored");
        Ok(Reaction::to_room(ServerEvent::ChatMessage { message: payload }))
    }

    /// Lifetime messages `user` may send: unlimited with a subscription,
    /// the free allowance otherwise.
    async fn allowance(&self, user: UserId) -> Result<Option<u64>, SessionError> {
        if self.services.subscriptions.is_active(user).await? {
            return Ok(None);
        }
        Ok(Some(self.services.free_message_limit))
    }

    async fn on_typing(&self, is_typing: bool) -> Result<Reaction, SessionError> {
        let (room, user) = (self.room, self.identity.user_id);
        self.services
            .store
            .call(move |db| {
                if is_typing {
                    db.upsert_typing(room, user)
                } else {
                    db.clear_typing(room, user).map(|_| ())
                }
            })
            .await?;

        Ok(Reaction::to_others(ServerEvent::TypingIndicator {
            user_id: user,
            username: self.identity.username.clone(),
            is_typing,
        }))
    }

    async fn on_message_read(&self, message_id: MessageId) -> Result<Reaction, SessionError> {
        let (room, user) = (self.room, self.identity.user_id);
        let outcome = self
            .services
            .store
            .call(move |db| db.mark_read(room, message_id, user))
            .await?;

        if outcome == ReadOutcome::UnknownMessage {
            return Ok(Reaction::Nothing);
        }
        Ok(Reaction::to_room(ServerEvent::MessageReadStatus {
            message_id,
            user_id: user,
            username: self.identity.username.clone(),
        }))
    }

    async fn on_delete(&self, message_id: MessageId) -> Result<Reaction, SessionError> {
        let (room, user) = (self.room, self.identity.user_id);
        let deleted = self
            .services
            .store
            .call(move |db| db.delete_own_message(room, message_id, user))
            .await?;

        if !deleted {
            debug!(room = %room, user = %user, message = %message_id, "Delete refused");
            return Ok(Reaction::Nothing);
        }
        Ok(Reaction::to_room(ServerEvent::MessageDeleted { message_id }))
    }

    async fn on_edit(&self, message_id: MessageId, content: String) -> Result<Reaction, SessionError> {
        if content.trim().is_empty() {
            return Ok(Reaction::Nothing);
        }

        let (room, user) = (self.room, self.identity.user_id);
        let payload = self
            .services
            .store
            .call(move |db| {
                match db.edit_own_message(room, message_id, user, &content)? {
                    Some(message) => db.to_payload(&message).map(Some),
                    None => Ok(None),
                }
            })
            .await?;

        match payload {
            Some(message) => Ok(Reaction::to_room(ServerEvent::MessageEdited { message })),
            None => {
                debug!(room = %room, user = %user, message = %message_id, "Edit refused");
                Ok(Reaction::Nothing)
            }
        }
    }

    async fn apply(&self, reaction: Reaction) -> Result<(), SessionError> {
        let Some(conn) = self.conn else {
            return Ok(());
        };

        match reaction {
            Reaction::Nothing => {}
            Reaction::Reply(event) => {
                if !self.services.hub.send_to(conn, &event).await? {
                    debug!(conn = %conn, "Reply dropped");
                }
            }
            Reaction::Broadcast {
                event,
                exclude_self,
            } => {
                let exclude = exclude_self.then_some(conn);
                self.services.hub.publish(self.room, &event, exclude).await?;
            }
        }
        Ok(())
    }

    /// Tear the session down. Safe to call more than once; only the first
    /// call does any work. Individual cleanup steps that fail are logged and
    /// the rest still run.
    pub async fn close(&mut self) {
        match self.state {
            SessionState::Closing | SessionState::Closed => return,
            SessionState::Connecting => {
                self.state = SessionState::Closed;
                return;
            }
            SessionState::Active => self.state = SessionState::Closing,
        }

        let (room, user) = (self.room, self.identity.user_id);

        let presence = match self.services.presence.disconnect(room, user).await {
            Ok(update) => Some(update),
            Err(e) => {
                warn!(room = %room, user = %user, error = %e, "Failed to mark user offline");
                None
            }
        };

        if let Err(e) = self
            .services
            .store
            .call(move |db| db.clear_typing(room, user))
            .await
        {
            warn!(room = %room, user = %user, error = %e, "Failed to clear typing indicator");
        }

        if let Some(conn) = self.conn {
            self.services.hub.unregister(room, conn).await;
        }

        if let Some(update) = presence {
            // Another connection of the same user keeps them online.
            let event = ServerEvent::UserStatus {
                user_id: user,
                username: self.identity.username.clone(),
                is_online: update.user_online(),
                online_count: update.online_count,
            };
            if let Err(e) = self.services.hub.publish(room, &event, None).await {
                warn!(room = %room, error = %e, "Failed to announce departure");
            }
        }

        self.state = SessionState::Closed;
        info!(room = %room, user = %user, "Session closed");
    }
}
