use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use tandem_shared::constants::{DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};
use tandem_shared::protocol::MessagePayload;
use tandem_shared::types::{Identity, MessageId, RoomId, UserId};
use tandem_store::{ChatRoom, RoomSummary, RoomType, StoreHandle};

use crate::auth::{bearer_token, Ed25519TokenVerifier, TokenVerifier};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::gateway::ws_chat;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::session::ChatServices;

#[derive(Clone)]
pub struct AppState {
    pub chat: ChatServices,
    pub verifier: Arc<dyn TokenVerifier>,
    pub rate_limiter: RateLimiter<IpAddr>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig, store: StoreHandle) -> Self {
        let verifier = Arc::new(Ed25519TokenVerifier::new(config.auth_server_pubkey));
        Self::with_verifier(config, store, verifier)
    }

    pub fn with_verifier(
        config: ServerConfig,
        store: StoreHandle,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        Self {
            chat: ChatServices::new(store, &config),
            verifier,
            rate_limiter: RateLimiter::default(),
            config: Arc::new(config),
        }
    }

    /// Resolve the caller of an API request and keep their user row current.
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, ServerError> {
        let identity = self.verifier.verify(bearer_token(headers)?)?;
        let row = identity.clone();
        self.chat.store.call(move |db| db.upsert_user(&row)).await?;
        Ok(identity)
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/rooms", get(list_rooms).post(create_room))
        .route("/rooms/:room_id/messages", get(room_history))
        .route("/admin/subscriptions/grant", post(admin_grant_subscription))
        .route("/admin/subscriptions/revoke", post(admin_revoke_subscription))
        .route("/ws/chat/:room_id", get(ws_chat))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    free_message_limit: u64,
}

#[derive(Deserialize)]
struct CreateRoomRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    room_type: RoomType,
    #[serde(default)]
    members: Vec<UserId>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
    before: Option<MessageId>,
}

#[derive(Deserialize)]
struct AdminSubscriptionRequest {
    user_id: UserId,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        free_message_limit: state.config.free_message_limit,
    })
}

async fn create_room(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<ChatRoom>), ServerError> {
    let caller = state.authenticate(&headers).await?;
    let name = req
        .name
        .map(|n| n.trim().to_owned())
        .filter(|n| !n.is_empty());

    let members = req.members;
    let lookup = members.clone();
    let missing = state
        .chat
        .store
        .call(move |db| db.missing_users(&lookup))
        .await?;
    if !missing.is_empty() {
        let ids: Vec<String> = missing.iter().map(ToString::to_string).collect();
        return Err(ServerError::BadRequest(format!(
            "Unknown member ids: {}",
            ids.join(", ")
        )));
    }

    let creator = caller.user_id;
    let room_type = req.room_type;
    let room = state
        .chat
        .store
        .call(move |db| db.create_room(name.as_deref(), room_type, creator, &members))
        .await?;

    info!(room = %room.id, creator = %creator, kind = room.room_type.as_str(), "Room created");
    Ok((StatusCode::CREATED, Json(room)))
}

async fn list_rooms(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<RoomSummary>>, ServerError> {
    let caller = state.authenticate(&headers).await?.user_id;
    let rooms = state
        .chat
        .store
        .call(move |db| db.list_rooms_for_user(caller))
        .await?;
    Ok(Json(rooms))
}

async fn room_history(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessagePayload>>, ServerError> {
    let caller = state.authenticate(&headers).await?.user_id;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let before = query.before;

    let page = state
        .chat
        .store
        .call(move |db| {
            db.get_room(room_id)?;
            if !db.is_member(room_id, caller)? {
                return Ok(None);
            }
            let messages = db.list_messages(room_id, limit, before)?;
            messages
                .iter()
                .map(|m| db.to_payload(m))
                .collect::<tandem_store::Result<Vec<_>>>()
                .map(Some)
        })
        .await?;

    page.map(Json)
        .ok_or_else(|| ServerError::Forbidden(format!("Not a member of room {room_id}")))
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

async fn admin_grant_subscription(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<AdminSubscriptionRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    state.chat.subscriptions.admin_grant(req.user_id).await?;
    Ok(Json(serde_json::json!({ "granted": true })))
}

async fn admin_revoke_subscription(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<AdminSubscriptionRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    state.chat.subscriptions.admin_revoke(req.user_id).await?;
    Ok(Json(serde_json::json!({ "revoked": true })))
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(state, listener).await
}

/// Serve on an already bound listener.
pub async fn serve_listener(state: AppState, listener: TcpListener) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %listener.local_addr()?, "Starting HTTP API server");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
