//! Invalidation cache backends
//!
//! The invalidation gate talks to a key/TTL store through the
//! [`InvalidationCache`] trait. Two backends are provided:
//!
//! - [`MemoryInvalidationCache`]: moka future cache with per-entry expiry,
//!   suitable for single-instance deployments and tests
//! - [`RedisInvalidationCache`]: shared store for multi-instance deployments
//!
//! Both prefix every key with a fixed namespace.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Cache backend errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cache backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            CacheError::Unavailable(err.to_string())
        } else {
            CacheError::Backend(err.to_string())
        }
    }
}

/// Key/TTL store used for invalidation entries
#[async_trait]
pub trait InvalidationCache: Send + Sync {
    /// Read an unexpired value
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Write or refresh a value with its own time-to-live
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Remove a value; removing a missing key is not an error
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

// ============================================================================
// Memory backend
// ============================================================================

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

/// Expires each entry after the TTL it was written with
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process invalidation cache
#[derive(Clone)]
pub struct MemoryInvalidationCache {
    cache: Cache<String, Entry>,
    namespace: String,
}

impl MemoryInvalidationCache {
    /// Entries leave only when their TTL runs out; the cache has no size
    /// bound
    pub fn new(namespace: impl Into<String>) -> Self {
        let cache = Cache::builder().expire_after(PerEntryTtl).build();

        Self {
            cache,
            namespace: namespace.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }
}

#[async_trait]
impl InvalidationCache for MemoryInvalidationCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.cache.get(&self.key(key)).await.map(|e| e.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let entry = Entry {
            value: value.to_string(),
            ttl,
        };
        self.cache.insert(self.key(key), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.cache.invalidate(&self.key(key)).await;
        Ok(())
    }
}

// ============================================================================
// Redis backend
// ============================================================================

/// Redis-backed invalidation cache shared across server instances
#[derive(Clone)]
pub struct RedisInvalidationCache {
    connection: MultiplexedConnection,
    namespace: String,
}

impl RedisInvalidationCache {
    /// Connect to `url` and use `namespace` as key prefix
    pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        tracing::info!(url = %url, "Connected to redis invalidation cache");

        Ok(Self {
            connection,
            namespace: namespace.into(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }
}

#[async_trait]
impl InvalidationCache for RedisInvalidationCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        // Redis rejects PX 0
        let millis = ttl.as_millis().max(1) as u64;
        let _: () = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("PX")
            .arg(millis)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.del(self.key(key)).await?;
        Ok(())
    }
}
