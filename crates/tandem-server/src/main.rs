use std::time::Duration;

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use tandem_server::api::{self, AppState};
use tandem_server::config::ServerConfig;
use tandem_store::StoreHandle;

/// Rate limiter buckets idle this long are dropped.
const LIMITER_IDLE: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tandem_server=debug")),
        )
        .init();

    info!("Starting Tandem chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        addr = %config.http_addr,
        database = %config.database_path.display(),
        "Loaded configuration"
    );
    info!(
        instance = %config.instance_name,
        free_message_limit = config.free_message_limit,
        admin_enabled = config.admin_token.is_some(),
        "Instance settings"
    );
    if config.auth_server_pubkey == [0u8; 32] {
        warn!("AUTH_SERVER_PUBKEY not set: every connection will be rejected");
    }

    // -----------------------------------------------------------------------
    // 3. Open the store and drop state left behind by a previous run
    // -----------------------------------------------------------------------
    let store = StoreHandle::open_at(&config.database_path)?;
    let (stale_online, stale_typing) = store
        .call(|db| Ok((db.reset_presence()?, db.clear_all_typing()?)))
        .await?;
    info!(stale_online, stale_typing, "Database ready");

    let http_addr = config.http_addr;
    let typing_ttl = config.typing_ttl;
    let app_state = AppState::new(config, store);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let ip_limiter = app_state.rate_limiter.clone();
    let user_limiter = app_state.chat.event_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            ip_limiter.purge_stale(LIMITER_IDLE).await;
            user_limiter.purge_stale(LIMITER_IDLE).await;
        }
    });

    // Periodic subscription cache cleanup (every 10 minutes)
    let subscriptions = app_state.chat.subscriptions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        loop {
            interval.tick().await;
            subscriptions.purge_expired().await;
        }
    });

    // Expire typing indicators from clients that vanished mid-sentence
    let store = app_state.chat.store.clone();
    tokio::spawn(async move {
        let period = (typing_ttl / 2).max(Duration::from_secs(1));
        let ttl = chrono::Duration::from_std(typing_ttl).unwrap_or(chrono::Duration::zero());
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let cutoff = chrono::Utc::now() - ttl;
            match store.call(move |db| db.purge_typing_before(cutoff)).await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "Expired stale typing indicators"),
                Err(e) => warn!(error = %e, "Typing expiry failed"),
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
