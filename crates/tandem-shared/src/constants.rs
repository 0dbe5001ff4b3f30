/// Application name
pub const APP_NAME: &str = "Tandem";

/// Messages a user without an active subscription may send, across all rooms
pub const FREE_MESSAGE_LIMIT: u64 = 10;

/// Error text sent to a sender who hit the free tier limit
pub const QUOTA_EXCEEDED_MESSAGE: &str =
    "You are not subscribed. Please subscribe to send more messages as you've hit the free tier limit.";

/// Error text sent to a sender who is flooding the room
pub const RATE_LIMITED_MESSAGE: &str = "You are sending events too quickly. Slow down.";

/// Query parameter carrying the access token on the WebSocket upgrade
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Maximum inbound WebSocket frame size in bytes (64 KiB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default HTTP/WebSocket port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default page size for message history
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Hard cap on message history page size
pub const MAX_HISTORY_LIMIT: u32 = 200;
