//! Session token codec
//!
//! Builds HMAC-SHA256 signed session tokens from user records and reverses
//! the operation. Configured fields are sealed (see [`super::seal`]) before
//! signing, so the signature covers their ciphertext and the plaintext never
//! appears in the token.

use super::seal::{FieldFailure, FieldSealer, SealError, SealParams};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use storefront_core::{AuthConfig, User};
use thiserror::Error;

/// Decoded contents of a session token
///
/// Plain claims are readable by anyone holding the token; `sealed` maps a
/// field name to its ciphertext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSet {
    /// Token issuer
    pub iss: String,
    /// Subject - user ID
    pub sub: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expiration (Unix seconds)
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// The user has a verified store connection
    #[serde(default)]
    pub shop_verified: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sealed: BTreeMap<String, String>,
}

impl ClaimSet {
    /// Plain claims for `user`; secret fields are never included here
    pub fn from_user(user: &User, issuer: &str, iat: i64, exp: i64) -> Self {
        Self {
            iss: issuer.to_string(),
            sub: user.id.clone(),
            iat,
            exp,
            username: Some(user.username.clone()),
            shop_domain: user.shop_domain.clone(),
            plan_id: user.plan_id.clone(),
            permissions: user.permissions.clone(),
            shop_verified: user.has_store_connection(),
            sealed: BTreeMap::new(),
        }
    }

    /// Drop the plaintext of a field that is about to be sealed
    fn clear_plain(&mut self, name: &str) {
        match name {
            "username" => self.username = None,
            "shop_domain" => self.shop_domain = None,
            "plan_id" => self.plan_id = None,
            _ => {}
        }
    }

    /// Put an unsealed value back into its plain slot. Values without a
    /// plain slot are handed back.
    fn restore_plain(&mut self, name: &str, value: String) -> Option<String> {
        match name {
            "username" => self.username = Some(value),
            "shop_domain" => self.shop_domain = Some(value),
            "plan_id" => self.plan_id = Some(value),
            _ => return Some(value),
        }
        None
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Token codec errors
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Failed to encode token: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("Invalid token format")]
    InvalidToken,

    #[error("Token has expired")]
    ExpiredToken,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token horizon must end in the future")]
    InvalidHorizon,
}

/// A freshly issued token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// Fields left out of the token because sealing them failed
    pub seal_failures: Vec<FieldFailure>,
}

/// Result of unsealing a verified claim set
#[derive(Debug, Clone)]
pub struct Unsealed {
    /// Claims with sealed plain-slot fields restored and `sealed` emptied
    pub claims: ClaimSet,
    /// Unsealed values that have no plain slot (e.g. access tokens)
    pub secrets: BTreeMap<String, String>,
    /// Fields dropped because they could not be unsealed
    pub failures: Vec<FieldFailure>,
}

/// Issues, verifies and unseals session tokens
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    sealable_fields: Vec<String>,
    horizon: Duration,
    sealer: FieldSealer,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .field("sealable_fields", &self.sealable_fields)
            .field("horizon", &self.horizon)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(
        signing_secret: &str,
        issuer: impl Into<String>,
        sealable_fields: Vec<String>,
        horizon: Duration,
        sealer: FieldSealer,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(signing_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(signing_secret.as_bytes()),
            issuer: issuer.into(),
            sealable_fields,
            horizon,
            sealer,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        let sealer = FieldSealer::new(
            &config.sealing_password,
            SealParams {
                salt_len: config.seal_salt_len,
                ..Default::default()
            },
        );
        Self::new(
            &config.signing_secret,
            config.issuer.clone(),
            config.sealable_fields.clone(),
            Duration::days(config.token_horizon_days),
            sealer,
        )
    }

    pub fn sealable_fields(&self) -> &[String] {
        &self.sealable_fields
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Issue a token for `user` with the configured horizon
    pub fn issue(&self, user: &User) -> Result<IssuedToken, TokenError> {
        self.issue_with_horizon(user, self.horizon)
    }

    /// Issue a token for `user` expiring `horizon` from now
    ///
    /// A field that fails to seal is left out of the token and reported in
    /// [`IssuedToken::seal_failures`]; issuance itself still succeeds.
    pub fn issue_with_horizon(
        &self,
        user: &User,
        horizon: Duration,
    ) -> Result<IssuedToken, TokenError> {
        let now = Utc::now();
        let expires_at = now + horizon;
        if expires_at.timestamp() <= now.timestamp() {
            return Err(TokenError::InvalidHorizon);
        }

        let mut claims =
            ClaimSet::from_user(user, &self.issuer, now.timestamp(), expires_at.timestamp());
        let mut seal_failures = Vec::new();

        for name in &self.sealable_fields {
            claims.clear_plain(name);
            let Some(value) = user.field(name) else {
                continue;
            };
            match self.sealer.seal(name, value) {
                Ok(sealed) => {
                    claims.sealed.insert(name.clone(), sealed);
                }
                Err(error) => seal_failures.push(FieldFailure {
                    field: name.clone(),
                    error,
                }),
            }
        }

        let token = self.sign(&claims)?;

        Ok(IssuedToken {
            token,
            expires_at: claims.expires_at(),
            seal_failures,
        })
    }

    /// Sign an already assembled claim set
    pub fn sign(&self, claims: &ClaimSet) -> Result<String, TokenError> {
        Ok(encode(
            &Header::new(Algorithm::HS256),
            claims,
            &self.encoding_key,
        )?)
    }

    /// Check signature, shape and expiry; sealed fields stay ciphertext
    pub fn verify(&self, token: &str) -> Result<ClaimSet, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.leeway = 0;

        let token_data = decode::<ClaimSet>(token, &self.decoding_key, &validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::ExpiredToken,
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                _ => TokenError::InvalidToken,
            },
        )?;

        // exp is whole seconds: once its second has begun the token is dead
        if token_data.claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::ExpiredToken);
        }

        Ok(token_data.claims)
    }

    /// Decrypt sealed fields; undecryptable fields are dropped and reported
    pub fn unseal(&self, mut claims: ClaimSet) -> Unsealed {
        let sealed = std::mem::take(&mut claims.sealed);
        let mut secrets = BTreeMap::new();
        let mut failures = Vec::new();

        for (name, ciphertext) in sealed {
            if !self.sealable_fields.contains(&name) {
                failures.push(FieldFailure {
                    field: name,
                    error: SealError::ParameterMismatch("field is not sealable".to_string()),
                });
                continue;
            }

            match self.sealer.unseal(&name, &ciphertext) {
                Ok(value) => {
                    if let Some(value) = claims.restore_plain(&name, value) {
                        secrets.insert(name, value);
                    }
                }
                Err(error) => failures.push(FieldFailure { field: name, error }),
            }
        }

        Unsealed {
            claims,
            secrets,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    fn codec_with(password: &str, fields: &[&str]) -> TokenCodec {
        TokenCodec::new(
            "test-signing-secret",
            "storefront",
            fields.iter().map(|f| f.to_string()).collect(),
            Duration::days(30),
            FieldSealer::new(password, SealParams::default()),
        )
    }

    fn codec() -> TokenCodec {
        codec_with("test-sealing-password", &["shopify_access_token"])
    }

    fn connected_user() -> User {
        let mut user = User::new("alice", "hash");
        user.connect_store("alice.myshopify.com", "shpat_secret");
        user.plan_id = Some("basic".to_string());
        user.permissions = vec!["orders:read".to_string()];
        user
    }

    #[test]
    fn test_issue_and_verify() {
        let codec = codec();
        let user = connected_user();

        let issued = codec.issue(&user).expect("Failed to issue token");
        assert!(issued.seal_failures.is_empty());

        let claims = codec.verify(&issued.token).expect("Failed to verify token");
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.iss, "storefront");
        assert_eq!(claims.username.as_deref(), Some("alice"));
        assert_eq!(claims.shop_domain.as_deref(), Some("alice.myshopify.com"));
        assert_eq!(claims.plan_id.as_deref(), Some("basic"));
        assert_eq!(claims.permissions, vec!["orders:read".to_string()]);
        assert!(claims.shop_verified);
        assert!(claims.sealed.contains_key("shopify_access_token"));
        assert_eq!(claims.exp, issued.expires_at.timestamp());
    }

    #[test]
    fn test_sealed_plaintext_not_in_token() {
        let codec = codec();
        let issued = codec.issue(&connected_user()).unwrap();

        let payload = issued.token.split('.').nth(1).unwrap();
        let json = String::from_utf8(URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap();
        assert!(!json.contains("shpat_secret"));
        assert!(!json.contains("hashed_password"));
    }

    #[test]
    fn test_unseal_restores_fields() {
        let codec = codec_with("pw", &["shopify_access_token", "shop_domain"]);
        let issued = codec.issue(&connected_user()).unwrap();

        let claims = codec.verify(&issued.token).unwrap();
        assert!(claims.shop_domain.is_none());

        let unsealed = codec.unseal(claims);
        assert!(unsealed.failures.is_empty());
        assert!(unsealed.claims.sealed.is_empty());
        assert_eq!(
            unsealed.claims.shop_domain.as_deref(),
            Some("alice.myshopify.com")
        );
        assert_eq!(
            unsealed.secrets.get("shopify_access_token").map(String::as_str),
            Some("shpat_secret")
        );
    }

    #[test]
    fn test_unseal_with_other_password_drops_field() {
        let issuer = codec_with("password-one", &["shopify_access_token"]);
        let reader = codec_with("password-two", &["shopify_access_token"]);

        let issued = issuer.issue(&connected_user()).unwrap();
        // Same signing secret, so verification passes
        let claims = reader.verify(&issued.token).unwrap();
        let unsealed = reader.unseal(claims);

        assert!(unsealed.secrets.is_empty());
        assert_eq!(unsealed.failures.len(), 1);
        assert_eq!(unsealed.failures[0].field, "shopify_access_token");
        assert_eq!(unsealed.failures[0].error, SealError::Decryption);
        assert_eq!(unsealed.claims.username.as_deref(), Some("alice"));
    }

    #[test]
    fn test_unsealable_field_in_token_is_dropped() {
        let codec = codec();
        let mut claims = codec.verify(&codec.issue(&connected_user()).unwrap().token).unwrap();
        claims.sealed.insert("plan_id".to_string(), "sf1*whatever".to_string());

        let unsealed = codec.unseal(claims);
        assert!(unsealed.failures.iter().any(|f| f.field == "plan_id"));
        assert!(unsealed.secrets.contains_key("shopify_access_token"));
    }

    #[test]
    fn test_absent_sealable_field_is_skipped() {
        let codec = codec();
        let user = User::new("bob", "hash");

        let issued = codec.issue(&user).unwrap();
        let claims = codec.verify(&issued.token).unwrap();
        assert!(claims.sealed.is_empty());
        assert!(!claims.shop_verified);
    }

    #[test]
    fn test_expired_token() {
        let codec = codec();
        let now = Utc::now().timestamp();

        let mut claims = ClaimSet::from_user(&connected_user(), "storefront", now - 60, now - 1);
        claims.sealed.clear();
        let token = codec.sign(&claims).unwrap();

        assert!(matches!(codec.verify(&token), Err(TokenError::ExpiredToken)));
    }

    #[test]
    fn test_token_expiring_this_second_is_rejected() {
        let codec = codec();
        let now = Utc::now().timestamp();
        let claims = ClaimSet::from_user(&connected_user(), "storefront", now - 60, now);
        let token = codec.sign(&claims).unwrap();

        assert!(matches!(codec.verify(&token), Err(TokenError::ExpiredToken)));
    }

    #[test]
    fn test_non_positive_horizon_rejected() {
        let codec = codec();
        let result = codec.issue_with_horizon(&connected_user(), Duration::seconds(-1));
        assert!(matches!(result, Err(TokenError::InvalidHorizon)));
        let result = codec.issue_with_horizon(&connected_user(), Duration::zero());
        assert!(matches!(result, Err(TokenError::InvalidHorizon)));
    }

    #[test]
    fn test_wrong_secret() {
        let codec1 = codec();
        let codec2 = TokenCodec::new(
            "another-secret",
            "storefront",
            vec![],
            Duration::days(1),
            FieldSealer::new("pw", SealParams::default()),
        );

        let token = codec1.issue(&connected_user()).unwrap().token;
        assert!(matches!(
            codec2.verify(&token),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn test_wrong_issuer() {
        let codec = codec();
        let now = Utc::now().timestamp();
        let claims = ClaimSet::from_user(&connected_user(), "someone-else", now, now + 60);
        let token = codec.sign(&claims).unwrap();

        assert!(matches!(codec.verify(&token), Err(TokenError::InvalidToken)));
    }

    #[test]
    fn test_single_bit_flip_in_signature() {
        let codec = codec();
        let token = codec.issue(&connected_user()).unwrap().token;
        let (message, signature) = token.rsplit_once('.').unwrap();
        let signature = URL_SAFE_NO_PAD.decode(signature).unwrap();

        for byte in 0..signature.len() {
            for bit in 0..8 {
                let mut flipped = signature.clone();
                flipped[byte] ^= 1 << bit;
                let forged = format!("{message}.{}", URL_SAFE_NO_PAD.encode(&flipped));
                assert!(
                    codec.verify(&forged).is_err(),
                    "flip at byte {byte} bit {bit} verified"
                );
            }
        }
    }

    #[test]
    fn test_tampered_payload() {
        let codec = codec();
        let token = codec.issue(&connected_user()).unwrap().token;
        let parts: Vec<&str> = token.split('.').collect();

        let mut claims: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        claims["plan_id"] = serde_json::json!("enterprise");
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert!(matches!(
            codec.verify(&forged),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn test_garbage_token() {
        let codec = codec();
        assert!(matches!(
            codec.verify("invalid.token.here"),
            Err(TokenError::InvalidToken)
        ));
        assert!(codec.verify("").is_err());
    }

    #[test]
    fn test_from_config() {
        let config = AuthConfig::default();
        let codec = TokenCodec::from_config(&config);
        assert_eq!(codec.issuer(), "storefront");
        assert_eq!(codec.sealable_fields(), &["shopify_access_token".to_string()]);

        let issued = codec.issue(&connected_user()).unwrap();
        let days = (issued.expires_at - Utc::now()).num_days();
        assert!((29..=30).contains(&days));
    }
}
