//! Shopify request and webhook signatures
//!
//! Machine-to-machine callbacks carry no session token. They are authenticated
//! by an HMAC-SHA256 over the request computed with the app's shared secret:
//!
//! - App launch / OAuth redirects: `hmac` query parameter, lowercase hex over
//!   the remaining parameters sorted by key and joined as `k=v&k=v`
//! - Webhooks: `X-Shopify-Hmac-Sha256` header, standard base64 over the raw body
//!
//! Comparison goes through [`Mac::verify_slice`], which is constant time.
//! A signed query is also bounded in time by its `timestamp` parameter.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Query parameters that carry the signature and are left out of the message
const SIGNATURE_PARAMS: &[&str] = &["hmac", "signature"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Shared secret is empty")]
    EmptySecret,

    #[error("Signature is missing")]
    Missing,

    #[error("Signature is not valid {0}")]
    Encoding(&'static str),

    #[error("Signature does not match")]
    Mismatch,

    #[error("Invalid HMAC key")]
    InvalidKey,

    #[error("Timestamp is missing or malformed")]
    BadTimestamp,

    #[error("Timestamp is outside the accepted window")]
    Stale,
}

/// Something that claims to be signed with the shared secret
#[derive(Debug, Clone, Copy)]
pub enum SignedPayload<'a> {
    /// Query string parameters including their `hmac` parameter
    Query(&'a BTreeMap<String, String>),
    /// Raw webhook body plus the base64 signature header value
    Webhook { body: &'a [u8], signature: &'a str },
}

/// True iff `payload` carries a valid signature for `shared_secret`
pub fn is_authentic_signature(payload: SignedPayload<'_>, shared_secret: &str) -> bool {
    check_signature(payload, shared_secret).is_ok()
}

/// Like [`is_authentic_signature`] but says why a check failed
pub fn check_signature(payload: SignedPayload<'_>, shared_secret: &str) -> Result<(), SignatureError> {
    if shared_secret.is_empty() {
        return Err(SignatureError::EmptySecret);
    }

    match payload {
        SignedPayload::Query(params) => {
            let provided = params
                .get("hmac")
                .filter(|v| !v.is_empty())
                .ok_or(SignatureError::Missing)?;
            let provided = hex::decode(provided).map_err(|_| SignatureError::Encoding("hex"))?;
            verify(shared_secret, query_message(params).as_bytes(), &provided)
        }
        SignedPayload::Webhook { body, signature } => {
            let signature = signature.trim();
            if signature.is_empty() {
                return Err(SignatureError::Missing);
            }
            let provided = STANDARD
                .decode(signature)
                .map_err(|_| SignatureError::Encoding("base64"))?;
            verify(shared_secret, body, &provided)
        }
    }
}

/// Reject a signed query whose `timestamp` (unix seconds) lies more than
/// `max_age_secs` from `now` in either direction
pub fn check_freshness(
    params: &BTreeMap<String, String>,
    now: i64,
    max_age_secs: u64,
) -> Result<(), SignatureError> {
    let timestamp: i64 = params
        .get("timestamp")
        .and_then(|v| v.parse().ok())
        .ok_or(SignatureError::BadTimestamp)?;

    if timestamp.abs_diff(now) > max_age_secs {
        return Err(SignatureError::Stale);
    }
    Ok(())
}

/// Lowercase hex HMAC for a set of query parameters
pub fn compute_query_signature(
    params: &BTreeMap<String, String>,
    shared_secret: &str,
) -> Result<String, SignatureError> {
    let mac = mac(shared_secret, query_message(params).as_bytes())?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Base64 HMAC for a webhook body
pub fn compute_webhook_signature(body: &[u8], shared_secret: &str) -> Result<String, SignatureError> {
    Ok(STANDARD.encode(mac(shared_secret, body)?.finalize().into_bytes()))
}

fn query_message(params: &BTreeMap<String, String>) -> String {
    // BTreeMap iterates in key order
    params
        .iter()
        .filter(|(key, _)| !SIGNATURE_PARAMS.contains(&key.as_str()))
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn mac(shared_secret: &str, message: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(shared_secret.as_bytes())
        .map_err(|_| SignatureError::InvalidKey)?;
    mac.update(message);
    Ok(mac)
}

fn verify(shared_secret: &str, message: &[u8], provided: &[u8]) -> Result<(), SignatureError> {
    mac(shared_secret, message)?
        .verify_slice(provided)
        .map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "hush";

    fn launch_params() -> BTreeMap<String, String> {
        [
            ("shop", "some-shop.myshopify.com"),
            ("timestamp", "1337178173"),
            ("code", "0907a61c0c8d55e99db179b68161bc00"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_query_signature_roundtrip() {
        let mut params = launch_params();
        let hmac = compute_query_signature(&params, SECRET).unwrap();
        assert_eq!(hmac.len(), 64);
        assert!(hmac.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        params.insert("hmac".to_string(), hmac);
        assert!(is_authentic_signature(SignedPayload::Query(&params), SECRET));
    }

    #[test]
    fn test_query_signature_ignores_signature_params() {
        let mut params = launch_params();
        let hmac = compute_query_signature(&params, SECRET).unwrap();
        params.insert("signature".to_string(), "legacy".to_string());
        params.insert("hmac".to_string(), hmac);

        assert!(is_authentic_signature(SignedPayload::Query(&params), SECRET));
    }

    #[test]
    fn test_query_signature_rejects_tampering() {
        let mut params = launch_params();
        let hmac = compute_query_signature(&params, SECRET).unwrap();
        params.insert("hmac".to_string(), hmac);
        params.insert("shop".to_string(), "other-shop.myshopify.com".to_string());

        assert_eq!(
            check_signature(SignedPayload::Query(&params), SECRET),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_query_signature_missing_or_garbled() {
        let mut params = launch_params();
        assert_eq!(
            check_signature(SignedPayload::Query(&params), SECRET),
            Err(SignatureError::Missing)
        );

        params.insert("hmac".to_string(), "not-hex".to_string());
        assert_eq!(
            check_signature(SignedPayload::Query(&params), SECRET),
            Err(SignatureError::Encoding("hex"))
        );
    }

    #[test]
    fn test_webhook_signature() {
        let body = br#"{"id":1,"domain":"some-shop.myshopify.com"}"#;
        let signature = compute_webhook_signature(body, SECRET).unwrap();

        assert!(is_authentic_signature(
            SignedPayload::Webhook {
                body,
                signature: &signature
            },
            SECRET
        ));
        assert!(!is_authentic_signature(
            SignedPayload::Webhook {
                body: b"{}",
                signature: &signature
            },
            SECRET
        ));
        assert!(!is_authentic_signature(
            SignedPayload::Webhook {
                body,
                signature: &signature
            },
            "other-secret"
        ));
    }

    #[test]
    fn test_webhook_signature_encoding() {
        assert_eq!(
            check_signature(
                SignedPayload::Webhook {
                    body: b"{}",
                    signature: "%%%"
                },
                SECRET
            ),
            Err(SignatureError::Encoding("base64"))
        );
        assert_eq!(
            check_signature(
                SignedPayload::Webhook {
                    body: b"{}",
                    signature: "  "
                },
                SECRET
            ),
            Err(SignatureError::Missing)
        );
    }

    #[test]
    fn test_empty_secret_never_authenticates() {
        let body = b"{}";
        let signature = compute_webhook_signature(body, "").unwrap();
        assert_eq!(
            check_signature(
                SignedPayload::Webhook {
                    body,
                    signature: &signature
                },
                ""
            ),
            Err(SignatureError::EmptySecret)
        );
    }

    #[test]
    fn test_freshness_window() {
        let params = launch_params();
        let signed_at = 1_337_178_173;

        assert_eq!(check_freshness(&params, signed_at + 60, 300), Ok(()));
        assert_eq!(check_freshness(&params, signed_at - 60, 300), Ok(()));
        assert_eq!(
            check_freshness(&params, signed_at + 301, 300),
            Err(SignatureError::Stale)
        );

        let mut params = params;
        params.remove("timestamp");
        assert_eq!(
            check_freshness(&params, signed_at, 300),
            Err(SignatureError::BadTimestamp)
        );
        params.insert("timestamp".to_string(), "yesterday".to_string());
        assert_eq!(
            check_freshness(&params, signed_at, 300),
            Err(SignatureError::BadTimestamp)
        );
    }
}
