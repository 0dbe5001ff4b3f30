//! Subscription status lookup and caching.
//!
//! Answers "does this user have an active subscription" from the
//! `subscriptions` table and caches positive answers for a short while so
//! the per-message quota check does not hit the database every time.
//! Negative answers are never cached: a user who just subscribed must be
//! able to send right away.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use tandem_shared::types::UserId;
use tandem_store::{Result, StoreHandle};

// ---------------------------------------------------------------------------
// Cached entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CachedStatus {
    /// When this entry stops being trusted.
    valid_until: DateTime<Utc>,
}

impl CachedStatus {
    fn is_fresh(&self) -> bool {
        Utc::now() < self.valid_until
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SubscriptionGate {
    store: StoreHandle,
    ttl: chrono::Duration,
    /// Cache: user -> last positive lookup.
    cache: Arc<RwLock<HashMap<UserId, CachedStatus>>>,
}

impl SubscriptionGate {
    pub fn new(store: StoreHandle, ttl: Duration) -> Self {
        Self {
            store,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Whether `user` currently has an active subscription.
    pub async fn is_active(&self, user: UserId) -> Result<bool> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&user) {
                if entry.is_fresh() {
                    debug!(user = %user, "Subscription status served from cache");
                    return Ok(true);
                }
            }
        }

        let active = self
            .store
            .call(move |db| db.has_active_subscription(user))
            .await?;

        if active {
            let mut cache = self.cache.write().await;
            cache.insert(
                user,
                CachedStatus {
                    valid_until: Utc::now() + self.ttl,
                },
            );
        }

        Ok(active)
    }

    /// Turn a subscription on (admin action).
    pub async fn admin_grant(&self, user: UserId) -> Result<()> {
        self.store
            .call(move |db| db.set_subscription(user, true))
            .await?;

        let mut cache = self.cache.write().await;
        cache.insert(
            user,
            CachedStatus {
                valid_until: Utc::now() + self.ttl,
            },
        );
        info!(user = %user, "Subscription granted");
        Ok(())
    }

    /// Turn a subscription off (admin action). Takes effect immediately.
    pub async fn admin_revoke(&self, user: UserId) -> Result<()> {
        self.store
            .call(move |db| db.set_subscription(user, false))
            .await?;

        let mut cache = self.cache.write().await;
        cache.remove(&user);
        info!(user = %user, "Subscription revoked");
        Ok(())
    }

    /// Evict expired entries from the cache.
    pub async fn purge_expired(&self) {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.is_fresh());
        let removed = before - cache.len();
        if removed > 0 {
            debug!(removed, "Purged expired subscription cache entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(ttl: Duration) -> SubscriptionGate {
        SubscriptionGate::new(StoreHandle::open_in_memory().unwrap(), ttl)
    }

    #[tokio::test]
    async fn test_unknown_user_is_inactive() {
        let gate = gate(Duration::from_secs(60));
        assert!(!gate.is_active(UserId(1)).await.unwrap());
        assert!(gate.cache.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_store_lookup_is_cached() {
        let gate = gate(Duration::from_secs(60));
        gate.store
            .call(|db| db.set_subscription(UserId(2), true))
            .await
            .unwrap();

        assert!(gate.is_active(UserId(2)).await.unwrap());
        assert!(gate.cache.read().await.contains_key(&UserId(2)));

        // The cache keeps answering even after the row flips.
        gate.store
            .call(|db| db.set_subscription(UserId(2), false))
            .await
            .unwrap();
        assert!(gate.is_active(UserId(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_grant_and_revoke() {
        let gate = gate(Duration::from_secs(60));

        gate.admin_grant(UserId(3)).await.unwrap();
        assert!(gate.is_active(UserId(3)).await.unwrap());

        gate.admin_revoke(UserId(3)).await.unwrap();
        assert!(!gate.is_active(UserId(3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let gate = gate(Duration::ZERO);
        gate.admin_grant(UserId(4)).await.unwrap();

        gate.purge_expired().await;
        assert!(gate.cache.read().await.is_empty());
    }
}
