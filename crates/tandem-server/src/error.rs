use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use tandem_shared::error::{ProtocolError, TokenError};
use tandem_shared::types::{RoomId, UserId};
use tandem_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] TokenError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, "Record not found".to_string())
            }
            ServerError::Store(StoreError::Invalid(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::Store(e) => {
                tracing::warn!(error = %e, "Storage failure while serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Faults raised while a room session is processing events.
///
/// None of these terminate the process. [`SessionError::is_fatal`] decides
/// whether the session keeps reading or moves to `Closing`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Outbound encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("User {user} is not a member of room {room}")]
    MembershipDenied { room: RoomId, user: UserId },

    #[error("Session is {0:?}, not active")]
    NotActive(crate::session::SessionState),
}

impl SessionError {
    /// Transport and lifecycle faults end the session; everything else drops
    /// the triggering event and keeps the connection open.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Transport(_)
                | SessionError::MembershipDenied { .. }
                | SessionError::NotActive(_)
        )
    }
}
