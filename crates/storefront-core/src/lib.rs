//! Storefront Core - Domain models, configuration, and store traits
//!
//! This crate defines the abstractions shared by the API server and CLI:
//! - Application configuration (environment and TOML)
//! - The `User` document model
//! - The `UserStore` collaborator trait and an in-memory implementation

pub mod config;
pub mod store;
pub mod user;

pub use config::{
    AppConfig, AuthConfig, CacheBackend, CacheConfig, ConfigError, LoggingConfig, ServerConfig,
    ShopifyConfig,
};
pub use store::{MemoryUserStore, StoreError, UserSelector, UserStore};
pub use user::{PasswordReset, User};
