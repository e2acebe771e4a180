//! Application state management
//!
//! Every collaborator is built once at startup from the immutable
//! [`AppConfig`] and injected here; handlers and guards reach them through
//! `State<Arc<AppState>>`.
//!
//! Author: hephaex@gmail.com

use crate::auth::cache::{InvalidationCache, MemoryInvalidationCache, RedisInvalidationCache};
use crate::auth::gate::InvalidationGate;
use crate::auth::middleware::SessionGuard;
use crate::auth::notifier::{ResetNotifier, TracingResetNotifier};
use crate::auth::service::AuthService;
use crate::auth::token::TokenCodec;
use axum::http::HeaderName;
use std::sync::Arc;
use std::time::Instant;
use storefront_core::{AppConfig, CacheBackend, ConfigError, MemoryUserStore, UserStore};

/// Application state shared across handlers
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn UserStore>,
    pub codec: Arc<TokenCodec>,
    pub gate: InvalidationGate,
    pub guard: SessionGuard,
    pub auth_service: AuthService,
    pub notifier: Arc<dyn ResetNotifier>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the state from already constructed collaborators
    pub fn new(
        config: AppConfig,
        store: Arc<dyn UserStore>,
        cache: Arc<dyn InvalidationCache>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let header_name = HeaderName::from_bytes(config.auth.header_name.as_bytes()).map_err(
            |_| ConfigError::InvalidValue {
                key: "auth.header_name".to_string(),
                value: config.auth.header_name.clone(),
            },
        )?;

        let codec = Arc::new(TokenCodec::from_config(&config.auth));
        let gate = InvalidationGate::from_config(cache, &config.auth, &config.cache);
        let guard = SessionGuard::new(codec.clone(), gate.clone(), header_name);
        let auth_service = AuthService::new(store.clone(), codec.clone(), gate.clone(), &config.auth);

        Ok(Self {
            config: Arc::new(config),
            store,
            codec,
            gate,
            guard,
            auth_service,
            notifier: Arc::new(TracingResetNotifier),
            start_time: Instant::now(),
        })
    }

    /// Build the state for `config`, connecting the configured cache backend
    ///
    /// Users are kept in the in-process store; a document database plugs in
    /// through [`AppState::new`].
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let cache: Arc<dyn InvalidationCache> = match config.cache.backend {
            CacheBackend::Memory => {
                Arc::new(MemoryInvalidationCache::new(config.cache.namespace.clone()))
            }
            CacheBackend::Redis => Arc::new(
                RedisInvalidationCache::connect(&config.cache.redis_url, config.cache.namespace.clone())
                    .await?,
            ),
        };

        Ok(Self::new(config, Arc::new(MemoryUserStore::new()), cache)?)
    }

    /// Replace the channel that delivers password reset tokens
    pub fn with_notifier(mut self, notifier: Arc<dyn ResetNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_cache() -> Arc<dyn InvalidationCache> {
        Arc::new(MemoryInvalidationCache::new("auth-invalidation"))
    }

    #[test]
    fn test_state_from_default_config() {
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(MemoryUserStore::new()),
            memory_cache(),
        )
        .unwrap();

        assert_eq!(state.guard.header_name().as_str(), "x-storefront-token");
        assert_eq!(state.codec.issuer(), "storefront");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.auth.signing_secret = String::new();

        let result = AppState::new(config, Arc::new(MemoryUserStore::new()), memory_cache());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_from_config_memory_backend() {
        let state = AppState::from_config(AppConfig::default()).await.unwrap();
        assert!(!state.gate.is_invalidated("nobody").await);
    }
}
