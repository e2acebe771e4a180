//! Test doubles and state builders for unit and integration tests

use crate::auth::cache::{CacheError, InvalidationCache, MemoryInvalidationCache};
use crate::auth::notifier::{NotifyError, ResetNotice, ResetNotifier};
use crate::state::AppState;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storefront_core::{AppConfig, MemoryUserStore};

/// Every operation fails as if the cache host were unreachable
pub struct FailingCache;

#[async_trait]
impl InvalidationCache for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

/// Every operation hangs forever
pub struct StalledCache;

#[async_trait]
impl InvalidationCache for StalledCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        std::future::pending().await
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
        std::future::pending().await
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        std::future::pending().await
    }
}

/// Keeps every reset notice it is handed
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<ResetNotice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token of the most recent notice sent to `username`
    pub fn last_token_for(&self, username: &str) -> Option<String> {
        self.sent
            .lock()
            .expect("notifier lock poisoned")
            .iter()
            .rev()
            .find(|notice| notice.username == username)
            .map(|notice| notice.token.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("notifier lock poisoned").len()
    }
}

#[async_trait]
impl ResetNotifier for RecordingNotifier {
    async fn send_reset(&self, notice: &ResetNotice) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .expect("notifier lock poisoned")
            .push(notice.clone());
        Ok(())
    }
}

/// Default configuration with cheap password hashing
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.auth.password_memory_kib = 1024;
    config.auth.password_time_cost = 1;
    config.auth.password_parallelism = 1;
    config
}

/// State over `config` with an in-memory store and cache
pub fn test_state(config: AppConfig) -> AppState {
    let cache = Arc::new(MemoryInvalidationCache::new(config.cache.namespace.clone()));
    test_state_with_cache(config, cache)
}

/// State over `config` with an in-memory store and the given cache
pub fn test_state_with_cache(config: AppConfig, cache: Arc<dyn InvalidationCache>) -> AppState {
    AppState::new(config, Arc::new(MemoryUserStore::new()), cache)
        .expect("test configuration must be valid")
}
