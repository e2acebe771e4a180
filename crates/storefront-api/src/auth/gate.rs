//! Invalidation gate
//!
//! A per-user, time-bounded veto over otherwise valid session tokens. The
//! presence of an entry for a user id means every token for that user must
//! be treated as expired until the user logs in again.
//!
//! Reads fail closed: an unreadable or slow cache counts as "invalidated".
//! Writes are best-effort: failures are logged and swallowed, the TTL on
//! any stuck entry bounds the damage.

use super::cache::{CacheError, InvalidationCache};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use storefront_core::{AuthConfig, CacheConfig};

/// Per-user session veto backed by an [`InvalidationCache`]
#[derive(Clone)]
pub struct InvalidationGate {
    cache: Arc<dyn InvalidationCache>,
    ttl: Duration,
    op_timeout: Duration,
}

impl InvalidationGate {
    pub fn new(cache: Arc<dyn InvalidationCache>, ttl: Duration, op_timeout: Duration) -> Self {
        Self {
            cache,
            ttl,
            op_timeout,
        }
    }

    pub fn from_config(
        cache: Arc<dyn InvalidationCache>,
        auth: &AuthConfig,
        cache_config: &CacheConfig,
    ) -> Self {
        Self::new(
            cache,
            Duration::from_secs(auth.invalidation_ttl_secs),
            Duration::from_millis(cache_config.op_timeout_ms),
        )
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Force every session of `user_id` to re-authenticate
    pub async fn mark_invalid(&self, user_id: &str) {
        self.mark_invalid_for(user_id, self.ttl).await;
    }

    /// Like [`InvalidationGate::mark_invalid`] with an explicit TTL.
    /// Idempotent: a second call only refreshes the entry.
    pub async fn mark_invalid_for(&self, user_id: &str, ttl: Duration) {
        let marker = Utc::now().to_rfc3339();
        match self.bounded(self.cache.set(user_id, &marker, ttl)).await {
            Ok(()) => {
                tracing::debug!(user_id = %user_id, ttl_secs = ttl.as_secs(), "Sessions invalidated")
            }
            Err(e) => tracing::warn!(
                user_id = %user_id,
                error = %e,
                "Failed to write invalidation entry"
            ),
        }
    }

    /// True iff an unexpired entry exists, or the cache cannot be read
    pub async fn is_invalidated(&self, user_id: &str) -> bool {
        match self.bounded(self.cache.get(user_id)).await {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Invalidation cache unreadable, rejecting session"
                );
                true
            }
        }
    }

    /// Remove the veto after a successful login. Must be awaited before the
    /// new token is handed out.
    pub async fn clear_invalidation(&self, user_id: &str) {
        if let Err(e) = self.bounded(self.cache.delete(user_id)).await {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "Failed to clear invalidation entry; it will expire by TTL"
            );
        }
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        tokio::time::timeout(self.op_timeout, operation)
            .await
            .map_err(|_| CacheError::Timeout(self.op_timeout))?
    }
}
