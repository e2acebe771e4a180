//! Storefront Configuration Management
//!
//! Handles configuration from environment variables and config files
//! with sensible defaults for development. The resulting [`AppConfig`] is
//! built once at startup and shared read-only afterwards.

use crate::user::User;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEV_SIGNING_SECRET: &str = "development-signing-secret-change-in-production";
const DEV_SEALING_PASSWORD: &str = "development-sealing-password-change-in-production";

const SECS_PER_DAY: u64 = 24 * 60 * 60;
const MAX_TOKEN_HORIZON_DAYS: i64 = 3650;
const MAX_INVALIDATION_TTL_SECS: u64 = 2 * MAX_TOKEN_HORIZON_DAYS as u64 * SECS_PER_DAY;
const MAX_RESET_TTL_MINS: i64 = 7 * 24 * 60;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Session token configuration
    pub auth: AuthConfig,

    /// Invalidation cache configuration
    pub cache: CacheConfig,

    /// Shopify shared-secret configuration
    pub shopify: ShopifyConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Overwrite every field whose variable `lookup` resolves
    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        // Server
        if let Some(host) = lookup("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("API_PORT") {
            self.server.port = parse_var("API_PORT", port)?;
        }

        // Tokens
        if let Some(secret) = lookup("TOKEN_SIGNING_SECRET") {
            self.auth.signing_secret = secret;
        }
        if let Some(password) = lookup("TOKEN_SEALING_PASSWORD") {
            self.auth.sealing_password = password;
        }
        if let Some(fields) = lookup("TOKEN_SEALED_FIELDS") {
            self.auth.sealable_fields = split_list(&fields);
        }
        if let Some(days) = lookup("TOKEN_EXPIRATION_DAYS") {
            self.auth.token_horizon_days = parse_var("TOKEN_EXPIRATION_DAYS", days)?;
        }
        if let Some(issuer) = lookup("TOKEN_ISSUER") {
            self.auth.issuer = issuer;
        }
        if let Some(header) = lookup("AUTH_HEADER_NAME") {
            self.auth.header_name = header.to_lowercase();
        }
        if let Some(ttl) = lookup("AUTH_INVALIDATION_TTL_SECS") {
            self.auth.invalidation_ttl_secs = parse_var("AUTH_INVALIDATION_TTL_SECS", ttl)?;
        }
        if let Some(mins) = lookup("PASSWORD_RESET_TTL_MINS") {
            self.auth.password_reset_ttl_mins = parse_var("PASSWORD_RESET_TTL_MINS", mins)?;
        }

        // Cache
        if let Some(backend) = lookup("CACHE_BACKEND") {
            self.cache.backend = backend.parse()?;
        }
        if let Some(url) = lookup("REDIS_URL") {
            self.cache.redis_url = url;
        }
        if let Some(timeout) = lookup("CACHE_TIMEOUT_MS") {
            self.cache.op_timeout_ms = parse_var("CACHE_TIMEOUT_MS", timeout)?;
        }

        // Shopify
        if let Some(secret) = lookup("SHOPIFY_API_SECRET") {
            self.shopify.api_secret = secret;
        }
        if let Some(age) = lookup("SHOPIFY_LAUNCH_MAX_AGE_SECS") {
            self.shopify.launch_max_age_secs = parse_var("SHOPIFY_LAUNCH_MAX_AGE_SECS", age)?;
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("LOG_JSON") {
            self.logging.json_format = matches!(json.as_str(), "1" | "true" | "yes");
        }

        Ok(())
    }

    /// Reject configurations the auth layer cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let auth = &self.auth;

        if auth.signing_secret.is_empty() {
            return Err(ConfigError::MissingRequired("auth.signing_secret".to_string()));
        }
        if auth.sealing_password.is_empty() {
            return Err(ConfigError::MissingRequired("auth.sealing_password".to_string()));
        }
        if !(1..=MAX_TOKEN_HORIZON_DAYS).contains(&auth.token_horizon_days) {
            return Err(ConfigError::InvalidValue {
                key: "auth.token_horizon_days".to_string(),
                value: auth.token_horizon_days.to_string(),
            });
        }
        // An entry must outlive every token it vetoes
        let horizon_secs = auth.token_horizon_days as u64 * SECS_PER_DAY;
        if !(horizon_secs..=MAX_INVALIDATION_TTL_SECS).contains(&auth.invalidation_ttl_secs) {
            return Err(ConfigError::InvalidValue {
                key: "auth.invalidation_ttl_secs".to_string(),
                value: auth.invalidation_ttl_secs.to_string(),
            });
        }
        if !(1..=MAX_RESET_TTL_MINS).contains(&auth.password_reset_ttl_mins) {
            return Err(ConfigError::InvalidValue {
                key: "auth.password_reset_ttl_mins".to_string(),
                value: auth.password_reset_ttl_mins.to_string(),
            });
        }
        if auth.seal_salt_len == 0 {
            return Err(ConfigError::InvalidValue {
                key: "auth.seal_salt_len".to_string(),
                value: "0".to_string(),
            });
        }
        if let Some(unknown) = auth
            .sealable_fields
            .iter()
            .find(|name| !User::SEALABLE_FIELDS.contains(&name.as_str()))
        {
            return Err(ConfigError::InvalidValue {
                key: "auth.sealable_fields".to_string(),
                value: unknown.clone(),
            });
        }
        let header_ok = !auth.header_name.is_empty()
            && auth
                .header_name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !header_ok {
            return Err(ConfigError::InvalidValue {
                key: "auth.header_name".to_string(),
                value: auth.header_name.clone(),
            });
        }
        if self.cache.op_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "cache.op_timeout_ms".to_string(),
                value: "0".to_string(),
            });
        }
        if self.shopify.launch_max_age_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "shopify.launch_max_age_secs".to_string(),
                value: "0".to_string(),
            });
        }
        if self.cache.backend == CacheBackend::Redis && self.cache.redis_url.is_empty() {
            return Err(ConfigError::MissingRequired("cache.redis_url".to_string()));
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes (also bounds signed webhook bodies)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

/// Session token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret used to sign session tokens
    pub signing_secret: String,

    /// Password sealed claims are encrypted with
    pub sealing_password: String,

    /// User fields that are sealed before being embedded in a token
    pub sealable_fields: Vec<String>,

    /// Default token lifetime in days
    pub token_horizon_days: i64,

    /// Token issuer identifier
    pub issuer: String,

    /// Request header carrying the session token
    pub header_name: String,

    /// How long an invalidation entry vetoes a user's tokens
    pub invalidation_ttl_secs: u64,

    /// Random salt length for sealed claims, in bytes
    pub seal_salt_len: usize,

    /// Lifetime of a password reset token in minutes
    pub password_reset_ttl_mins: i64,

    /// Argon2 memory cost in KiB
    pub password_memory_kib: u32,

    /// Argon2 iterations
    pub password_time_cost: u32,

    /// Argon2 lanes
    pub password_parallelism: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signing_secret: DEV_SIGNING_SECRET.to_string(),
            sealing_password: DEV_SEALING_PASSWORD.to_string(),
            sealable_fields: vec!["shopify_access_token".to_string()],
            token_horizon_days: 30,
            issuer: "storefront".to_string(),
            header_name: "x-storefront-token".to_string(),
            // Outlives any token issued before the entry was written
            invalidation_ttl_secs: 30 * 24 * 60 * 60,
            seal_salt_len: 32,
            password_reset_ttl_mins: 60,
            password_memory_kib: 65536, // 64 MB
            password_time_cost: 3,
            password_parallelism: 4,
        }
    }
}

/// Invalidation cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Which cache backend holds invalidation entries
    pub backend: CacheBackend,

    /// Redis connection URL (redis backend only)
    pub redis_url: String,

    /// Key namespace for invalidation entries
    pub namespace: String,

    /// Upper bound on a single cache operation, in milliseconds
    pub op_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            namespace: "auth-invalidation".to_string(),
            op_timeout_ms: 250,
        }
    }
}

/// Supported invalidation cache backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Redis,
}

impl std::str::FromStr for CacheBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            _ => Err(ConfigError::InvalidValue {
                key: "CACHE_BACKEND".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Shopify configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShopifyConfig {
    /// App shared secret for query and webhook HMACs
    pub api_secret: String,

    /// Header carrying the webhook body signature
    pub webhook_header: String,

    /// How far a signed launch `timestamp` may drift from now, in seconds
    pub launch_max_age_secs: u64,
}

impl Default for ShopifyConfig {
    fn default() -> Self {
        Self {
            api_secret: "development-shopify-secret".to_string(),
            webhook_header: "x-shopify-hmac-sha256".to_string(),
            launch_max_age_secs: 300,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.token_horizon_days, 30);
        assert_eq!(config.cache.namespace, "auth-invalidation");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_backend_parse() {
        assert_eq!("memory".parse::<CacheBackend>().unwrap(), CacheBackend::Memory);
        assert_eq!("Redis".parse::<CacheBackend>().unwrap(), CacheBackend::Redis);
        assert!("memcached".parse::<CacheBackend>().is_err());
    }

    #[test]
    fn test_unknown_sealable_field_rejected() {
        let mut config = AppConfig::default();
        config.auth.sealable_fields = vec!["hashed_password".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "auth.sealable_fields"
        ));
    }

    #[test]
    fn test_empty_secret_rejected() {
        let mut config = AppConfig::default();
        config.auth.signing_secret.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(_))
        ));
    }

    #[test]
    fn test_header_name_must_be_lowercase_token() {
        let mut config = AppConfig::default();
        config.auth.header_name = "X Storefront".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_partial_sections_use_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [auth]
            sealable_fields = ["shopify_access_token", "shop_domain"]
            token_horizon_days = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.auth.token_horizon_days, 7);
        assert_eq!(config.auth.sealable_fields.len(), 2);
        assert_eq!(config.auth.header_name, "x-storefront-token");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(" a, b ,,c "),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config: AppConfig = toml::from_str(
            r#"
            [auth]
            issuer = "from-file"
            token_horizon_days = 7
            header_name = "x-file-token"

            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        config
            .apply_overrides(lookup(&[
                ("TOKEN_ISSUER", "from-env"),
                ("TOKEN_EXPIRATION_DAYS", "14"),
                ("TOKEN_SEALED_FIELDS", "shopify_access_token,plan_id"),
                ("CACHE_TIMEOUT_MS", "500"),
                ("LOG_JSON", "true"),
            ]))
            .unwrap();

        assert_eq!(config.auth.issuer, "from-env");
        assert_eq!(config.auth.token_horizon_days, 14);
        assert_eq!(config.auth.sealable_fields.len(), 2);
        assert_eq!(config.cache.op_timeout_ms, 500);
        assert!(config.logging.json_format);
        // Unset variables leave the file alone
        assert_eq!(config.auth.header_name, "x-file-token");
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_unparseable_override_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_overrides(lookup(&[("TOKEN_EXPIRATION_DAYS", "soon")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { key, .. }) if key == "TOKEN_EXPIRATION_DAYS"
        ));
    }

    #[test]
    fn test_invalidation_ttl_must_cover_horizon() {
        let mut config = AppConfig::default();
        config.auth.token_horizon_days = 30;
        config.auth.invalidation_ttl_secs = 7 * 24 * 60 * 60;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "auth.invalidation_ttl_secs"
        ));

        config.auth.invalidation_ttl_secs = 30 * 24 * 60 * 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let mut config = AppConfig::default();
        config.auth.token_horizon_days = i64::MAX / 2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "auth.token_horizon_days"
        ));

        let mut config = AppConfig::default();
        config.auth.password_reset_ttl_mins = i64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "auth.password_reset_ttl_mins"
        ));

        let mut config = AppConfig::default();
        config.auth.password_reset_ttl_mins = 0;
        assert!(config.validate().is_err());
    }
}
