use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Missing access token")]
    Missing,

    #[error("Malformed access token: {0}")]
    Malformed(String),

    #[error("Access token expired")]
    Expired,

    #[error("Invalid token signature")]
    BadSignature,

    #[error("Invalid verifying key")]
    InvalidKey,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame is not a JSON object: {0}")]
    NotJson(#[from] serde_json::Error),

    #[error("Frame has no string `type` tag")]
    MissingTag,

    #[error("Malformed `{tag}` event: {reason}")]
    Malformed { tag: String, reason: String },
}
