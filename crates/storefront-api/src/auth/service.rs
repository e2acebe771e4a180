//! Account service layer
//!
//! Signup, login, password management and store/plan changes. Every flow
//! that changes what a session token would say hands back a freshly issued
//! token; flows that must end sessions the client still holds write an
//! invalidation entry instead.

use super::gate::InvalidationGate;
use super::middleware::AuthorizationContext;
use super::password::{
    hash_password_with_config, validate_password_strength, verify_password, PasswordConfig,
};
use super::token::TokenCodec;
use crate::error::AppError;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use storefront_core::{AuthConfig, PasswordReset, User, UserSelector, UserStore};
use utoipa::ToSchema;

/// Account signup request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ForgotPasswordRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

/// Store connection established by the OAuth callback
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectStoreRequest {
    pub shop_domain: String,
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SelectPlanRequest {
    pub plan_id: String,
}

/// Public view of an account
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProfileInfo {
    pub id: String,
    pub username: Option<String>,
    pub shop_domain: Option<String>,
    pub shop_verified: bool,
    pub plan_id: Option<String>,
    pub permissions: Vec<String>,
}

impl From<&User> for ProfileInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: Some(user.username.clone()),
            shop_domain: user.shop_domain.clone(),
            shop_verified: user.has_store_connection(),
            plan_id: user.plan_id.clone(),
            permissions: user.permissions.clone(),
        }
    }
}

impl From<&AuthorizationContext> for ProfileInfo {
    fn from(context: &AuthorizationContext) -> Self {
        Self {
            id: context.user_id.clone(),
            username: context.username.clone(),
            shop_domain: context.shop_domain.clone(),
            shop_verified: context.shop_verified,
            plan_id: context.plan_id.clone(),
            permissions: context.permissions.clone(),
        }
    }
}

/// A freshly issued session token and the account it represents
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub token: String,
    /// Header the token must be sent in
    pub header: String,
    pub expires_at: DateTime<Utc>,
    pub user: ProfileInfo,
}

/// Account service
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn UserStore>,
    codec: Arc<TokenCodec>,
    gate: InvalidationGate,
    password_config: PasswordConfig,
    header_name: String,
    reset_ttl: Duration,
    /// Verified against when the username is unknown
    dummy_hash: Option<Arc<str>>,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn UserStore>,
        codec: Arc<TokenCodec>,
        gate: InvalidationGate,
        config: &AuthConfig,
    ) -> Self {
        let password_config = PasswordConfig::from(config);
        let dummy_hash = match hash_password_with_config(DUMMY_PASSWORD, &password_config) {
            Ok(hash) => Some(Arc::from(hash)),
            Err(e) => {
                tracing::warn!(error = %e, "Could not prepare placeholder password hash");
                None
            }
        };

        Self {
            store,
            codec,
            gate,
            password_config,
            header_name: config.header_name.clone(),
            reset_ttl: Duration::minutes(config.password_reset_ttl_mins),
            dummy_hash,
        }
    }

    /// Create an account and log it in
    pub async fn signup(&self, request: SignupRequest) -> Result<SessionResponse, AppError> {
        let username = request.username.trim();
        if username.is_empty() {
            return Err(AppError::BadRequest("Username is required".to_string()));
        }

        validate_password_strength(&request.password)
            .map_err(|e| AppError::BadRequest(format!("Password validation failed: {e}")))?;

        if !self
            .store
            .find(&UserSelector::username(username))
            .await?
            .is_empty()
        {
            return Err(AppError::Conflict("Username already taken".to_string()));
        }

        let hashed_password = self.hash(&request.password)?;
        let user = User::new(username, hashed_password);
        let id = user.id.clone();
        let user = self.store.put(&id, user, None).await?;

        self.session(&user)
    }

    /// Check credentials and issue a new session
    ///
    /// Any invalidation entry for the user is cleared before the token is
    /// returned, so the new token is never vetoed by a stale entry.
    /// An unknown username still costs one Argon2 verification.
    pub async fn login(&self, request: LoginRequest) -> Result<SessionResponse, AppError> {
        let Some(user) = self
            .store
            .find(&UserSelector::username(request.username.trim()))
            .await?
            .into_iter()
            .next()
        else {
            if let Some(hash) = &self.dummy_hash {
                let _ = verify_password(&request.password, hash);
            }
            return Err(AppError::Unauthorized);
        };

        let password_valid = verify_password(&request.password, &user.hashed_password)
            .map_err(|e| AppError::Internal(format!("Failed to verify password: {e}")))?;
        if !password_valid {
            return Err(AppError::Unauthorized);
        }

        self.gate.clear_invalidation(&user.id).await;

        self.session(&user)
    }

    /// Profile as carried by the session token
    pub fn me(&self, context: &AuthorizationContext) -> ProfileInfo {
        ProfileInfo::from(context)
    }

    /// Replace the password after re-checking the current one
    ///
    /// Sessions issued before the change stay valid until they expire. The
    /// invalidation veto covers a whole account and login lifts it, so it
    /// cannot end older sessions while keeping the one returned here. Ending
    /// every session goes through [`complete_password_reset`].
    ///
    /// [`complete_password_reset`]: Self::complete_password_reset
    pub async fn change_password(
        &self,
        context: &AuthorizationContext,
        request: ChangePasswordRequest,
    ) -> Result<SessionResponse, AppError> {
        let mut user = self.store.get(&context.user_id).await?;

        let password_valid = verify_password(&request.current_password, &user.hashed_password)
            .map_err(|e| AppError::Internal(format!("Failed to verify password: {e}")))?;
        if !password_valid {
            return Err(AppError::Unauthorized);
        }

        validate_password_strength(&request.new_password)
            .map_err(|e| AppError::BadRequest(format!("Password validation failed: {e}")))?;

        user.hashed_password = self.hash(&request.new_password)?;
        user.touch();
        let user = self.save(user).await?;

        self.session(&user)
    }

    /// Start a password reset
    ///
    /// Returns the raw reset token for delivery to the account owner; only
    /// its SHA-256 is stored. An unknown username yields `None` and no error.
    pub async fn begin_password_reset(
        &self,
        request: ForgotPasswordRequest,
    ) -> Result<Option<(String, String)>, AppError> {
        let Some(mut user) = self
            .store
            .find(&UserSelector::username(request.username.trim()))
            .await?
            .into_iter()
            .next()
        else {
            return Ok(None);
        };

        let token = generate_reset_token();
        user.password_reset = Some(PasswordReset {
            token_hash: hash_token(&token),
            expires_at: Utc::now() + self.reset_ttl,
        });
        user.touch();
        let user = self.save(user).await?;

        Ok(Some((user.id, token)))
    }

    /// Finish a password reset and end every outstanding session
    ///
    /// Returns the id of the account whose password was replaced.
    pub async fn complete_password_reset(
        &self,
        request: ResetPasswordRequest,
    ) -> Result<String, AppError> {
        let invalid = || AppError::BadRequest("Invalid or expired reset token".to_string());

        let mut user = self
            .store
            .find(&UserSelector::reset_token_hash(hash_token(request.token.trim())))
            .await?
            .into_iter()
            .next()
            .ok_or_else(invalid)?;

        let expired = user
            .password_reset
            .as_ref()
            .map_or(true, |reset| reset.expires_at <= Utc::now());
        if expired {
            return Err(invalid());
        }

        validate_password_strength(&request.new_password)
            .map_err(|e| AppError::BadRequest(format!("Password validation failed: {e}")))?;

        user.hashed_password = self.hash(&request.new_password)?;
        user.password_reset = None;
        user.touch();
        let user = self.save(user).await?;

        self.gate.mark_invalid(&user.id).await;

        Ok(user.id)
    }

    /// Attach a verified store connection; the access token is sealed in the
    /// returned session
    pub async fn connect_store(
        &self,
        context: &AuthorizationContext,
        request: ConnectStoreRequest,
    ) -> Result<SessionResponse, AppError> {
        let shop_domain = request.shop_domain.trim().to_ascii_lowercase();
        if !is_shop_domain(&shop_domain) {
            return Err(AppError::BadRequest(format!(
                "Invalid shop domain: {shop_domain}"
            )));
        }
        if request.access_token.trim().is_empty() {
            return Err(AppError::BadRequest("Access token is required".to_string()));
        }

        let mut user = self.store.get(&context.user_id).await?;
        user.connect_store(shop_domain, request.access_token.trim());
        let user = self.save(user).await?;

        self.session(&user)
    }

    /// Record the chosen plan; requires a verified store on the stored record
    pub async fn select_plan(
        &self,
        context: &AuthorizationContext,
        request: SelectPlanRequest,
    ) -> Result<SessionResponse, AppError> {
        let plan_id = request.plan_id.trim();
        if plan_id.is_empty() {
            return Err(AppError::BadRequest("Plan id is required".to_string()));
        }

        let mut user = self.store.get(&context.user_id).await?;
        if !user.has_store_connection() {
            return Err(AppError::Forbidden("Store connection required".to_string()));
        }

        user.plan_id = Some(plan_id.to_string());
        user.touch();
        let user = self.save(user).await?;

        self.session(&user)
    }

    /// App uninstalled for `shop_domain`: revoke the store connection of every
    /// attached account and force those accounts to log in again
    ///
    /// Returns the number of accounts affected.
    pub async fn revoke_store(&self, shop_domain: &str) -> Result<usize, AppError> {
        let users = self
            .store
            .find(&UserSelector::shop_domain(shop_domain.trim().to_ascii_lowercase()))
            .await?;

        let mut revoked = 0;
        for mut user in users {
            if user.shop_revoked_at.is_some() {
                continue;
            }
            user.revoke_store();
            let user = self.save(user).await?;
            self.gate.mark_invalid(&user.id).await;
            revoked += 1;
        }

        Ok(revoked)
    }

    async fn save(&self, user: User) -> Result<User, AppError> {
        let id = user.id.clone();
        let revision = user.revision.clone();
        Ok(self.store.put(&id, user, revision.as_deref()).await?)
    }

    fn hash(&self, password: &str) -> Result<String, AppError> {
        hash_password_with_config(password, &self.password_config)
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {e}")))
    }

    fn session(&self, user: &User) -> Result<SessionResponse, AppError> {
        let issued = self
            .codec
            .issue(user)
            .map_err(|e| AppError::Internal(format!("Failed to issue session token: {e}")))?;

        for failure in &issued.seal_failures {
            tracing::warn!(
                user_id = %user.id,
                field = %failure.field,
                error = %failure.error,
                "Sealed claim left out of session token"
            );
        }

        Ok(SessionResponse {
            token: issued.token,
            header: self.header_name.clone(),
            expires_at: issued.expires_at,
            user: ProfileInfo::from(user),
        })
    }
}

const DUMMY_PASSWORD: &str = "placeholder-password-for-unknown-users";

fn is_shop_domain(domain: &str) -> bool {
    domain
        .strip_suffix(".myshopify.com")
        .is_some_and(|name| {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Generate a cryptographically secure reset token
fn generate_reset_token() -> String {
    let token_bytes: [u8; 32] = rand::thread_rng().gen();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(token_bytes)
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
