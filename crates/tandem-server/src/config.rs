//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tandem_shared::constants::{DEFAULT_HTTP_PORT, FREE_MESSAGE_LIMIT};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./tandem.db`
    pub database_path: PathBuf,

    /// Ed25519 public key of the auth service (hex-encoded, 64 chars).
    /// Env: `AUTH_SERVER_PUBKEY`
    /// Default: all-zeros (development only, rejects every token).
    pub auth_server_pubkey: [u8; 32],

    /// Messages an unsubscribed user may send before being blocked.
    /// Env: `FREE_MESSAGE_LIMIT`
    /// Default: `10`
    pub free_message_limit: u64,

    /// How long a positive subscription lookup is trusted.
    /// Env: `SUBSCRIPTION_CACHE_SECS`
    /// Default: `60`
    pub subscription_cache_ttl: Duration,

    /// Per-connection outbound queue length; events beyond it are dropped
    /// for that connection only.
    /// Env: `OUTBOUND_QUEUE_CAPACITY`
    /// Default: `256`
    pub outbound_queue_capacity: usize,

    /// Typing indicators older than this are purged.
    /// Env: `TYPING_TTL_SECS`
    /// Default: `30`
    pub typing_ttl: Duration,

    /// Sustained inbound events per second allowed per user.
    /// Env: `EVENT_RATE`
    /// Default: `5`
    pub event_rate: f64,

    /// Inbound event burst allowed per user.
    /// Env: `EVENT_BURST`
    /// Default: `20`
    pub event_burst: f64,

    // -- Instance settings --

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Tandem"`
    pub instance_name: String,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./tandem.db"),
            auth_server_pubkey: [0u8; 32],
            free_message_limit: FREE_MESSAGE_LIMIT,
            subscription_cache_ttl: Duration::from_secs(60),
            outbound_queue_capacity: 256,
            typing_ttl: Duration::from_secs(30),
            event_rate: 5.0,
            event_burst: 20.0,
            instance_name: "Tandem".to_string(),
            admin_token: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. `from_env` is
    /// this with the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(hex_key) = lookup("AUTH_SERVER_PUBKEY") {
            match parse_hex_pubkey(&hex_key) {
                Ok(key) => config.auth_server_pubkey = key,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid AUTH_SERVER_PUBKEY, using default (dev-only)"
                    );
                }
            }
        }

        parse_into(&lookup, "FREE_MESSAGE_LIMIT", &mut config.free_message_limit);
        parse_into(&lookup, "OUTBOUND_QUEUE_CAPACITY", &mut config.outbound_queue_capacity);
        parse_into(&lookup, "EVENT_RATE", &mut config.event_rate);
        parse_into(&lookup, "EVENT_BURST", &mut config.event_burst);

        let mut secs = config.subscription_cache_ttl.as_secs();
        parse_into(&lookup, "SUBSCRIPTION_CACHE_SECS", &mut secs);
        config.subscription_cache_ttl = Duration::from_secs(secs);

        let mut secs = config.typing_ttl.as_secs();
        parse_into(&lookup, "TYPING_TTL_SECS", &mut secs);
        config.typing_ttl = Duration::from_secs(secs);

        // A zero-capacity mpsc channel panics on construction.
        config.outbound_queue_capacity = config.outbound_queue_capacity.max(1);

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(token) = lookup("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_pubkey(hex_str: &str) -> Result<[u8; 32], String> {
    let hex_str = hex_str.trim();
    if hex_str.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", hex_str.len()));
    }

    let bytes = hex::decode(hex_str).map_err(|e| e.to_string())?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
