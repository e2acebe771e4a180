//! User document model
//!
//! A `User` is the document the account service reads and writes through
//! [`crate::store::UserStore`]. Session tokens are derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored user account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Document identifier
    pub id: String,
    /// Store revision; `None` until first written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Login name
    pub username: String,
    /// Argon2id PHC string
    pub hashed_password: String,
    /// `*.myshopify.com` domain of the connected store
    #[serde(default)]
    pub shop_domain: Option<String>,
    /// Offline access token granted by the store
    #[serde(default)]
    pub shopify_access_token: Option<String>,
    /// The store connection was verified and is not revoked
    #[serde(default)]
    pub shop_verified: bool,
    /// Set when the app was uninstalled from the store
    #[serde(default)]
    pub shop_revoked_at: Option<DateTime<Utc>>,
    /// Selected billing plan
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Outstanding password reset, if any
    #[serde(default)]
    pub password_reset: Option<PasswordReset>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pending password reset; only the hash of the emailed token is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordReset {
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl User {
    /// String fields that may be sealed into a session token
    pub const SEALABLE_FIELDS: &'static [&'static str] =
        &["username", "shop_domain", "shopify_access_token", "plan_id"];

    /// Create a fresh, unsaved user
    pub fn new(username: impl Into<String>, hashed_password: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            revision: None,
            username: username.into(),
            hashed_password: hashed_password.into(),
            shop_domain: None,
            shopify_access_token: None,
            shop_verified: false,
            shop_revoked_at: None,
            plan_id: None,
            permissions: Vec::new(),
            password_reset: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Look up a sealable field by name
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "username" => Some(self.username.as_str()),
            "shop_domain" => self.shop_domain.as_deref(),
            "shopify_access_token" => self.shopify_access_token.as_deref(),
            "plan_id" => self.plan_id.as_deref(),
            _ => None,
        }
    }

    /// A verified, unrevoked store connection exists
    pub fn has_store_connection(&self) -> bool {
        self.shop_verified && self.shop_domain.is_some() && self.shop_revoked_at.is_none()
    }

    /// Attach a verified store connection
    pub fn connect_store(&mut self, shop_domain: impl Into<String>, access_token: impl Into<String>) {
        self.shop_domain = Some(shop_domain.into());
        self.shopify_access_token = Some(access_token.into());
        self.shop_verified = true;
        self.shop_revoked_at = None;
        self.touch();
    }

    /// Mark the store connection revoked; the domain is kept for lookups
    pub fn revoke_store(&mut self) {
        self.shopify_access_token = None;
        self.shop_verified = false;
        self.shop_revoked_at = Some(Utc::now());
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
