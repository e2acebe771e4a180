//! Shopify webhook handlers
//!
//! Bodies reach these handlers only after the webhook signature guard has
//! verified them.
//!
//! Author: hephaex@gmail.com

use crate::audit::{audit_log, AuditEvent};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

const SHOP_DOMAIN_HEADER: &str = "x-shopify-shop-domain";

/// Shop payload of the `app/uninstalled` topic
#[derive(Debug, Deserialize, ToSchema)]
pub struct UninstalledPayload {
    pub myshopify_domain: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UninstalledResponse {
    pub shop_domain: String,
    pub revoked_accounts: usize,
}

/// The app was uninstalled from a shop
///
/// Every account attached to the shop loses its store connection and must
/// log in again.
#[utoipa::path(
    post,
    path = "/webhooks/app/uninstalled",
    tag = "webhooks",
    request_body = UninstalledPayload,
    responses(
        (status = 200, description = "Store connections revoked", body = UninstalledResponse),
        (status = 400, description = "Malformed payload or shop domain mismatch", body = crate::error::ApiError),
        (status = 401, description = "Bad signature"),
    )
)]
pub async fn app_uninstalled_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, AppError> {
    let shop_domain = signed_shop_domain(&headers, &body)?;

    let revoked_accounts = state.auth_service.revoke_store(&shop_domain).await?;

    audit_log(&AuditEvent::StoreRevoked {
        shop_domain: shop_domain.clone(),
        affected_users: revoked_accounts,
    });

    Ok((
        StatusCode::OK,
        Json(UninstalledResponse {
            shop_domain,
            revoked_accounts,
        }),
    ))
}

/// The shop named by the signed body
///
/// The signature covers only the body, so the shop domain header is
/// accepted only as a copy of the body's domain.
fn signed_shop_domain(headers: &HeaderMap, body: &[u8]) -> Result<String, AppError> {
    let payload: UninstalledPayload = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Malformed webhook payload: {e}")))?;

    let shop_domain = payload
        .myshopify_domain
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| AppError::BadRequest("Shop domain missing".to_string()))?;

    if let Some(header) = headers.get(SHOP_DOMAIN_HEADER) {
        let header = header.to_str().unwrap_or_default().trim().to_ascii_lowercase();
        if header != shop_domain {
            return Err(AppError::BadRequest(
                "Shop domain header does not match payload".to_string(),
            ));
        }
    }

    Ok(shop_domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(shop: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SHOP_DOMAIN_HEADER, shop.parse().unwrap());
        headers
    }

    #[test]
    fn test_domain_comes_from_body() {
        let body = br#"{"myshopify_domain":"Alice.myshopify.com"}"#;
        assert_eq!(
            signed_shop_domain(&HeaderMap::new(), body).unwrap(),
            "alice.myshopify.com"
        );
        assert_eq!(
            signed_shop_domain(&headers("alice.myshopify.com"), body).unwrap(),
            "alice.myshopify.com"
        );
    }

    #[test]
    fn test_header_must_match_body() {
        let body = br#"{"myshopify_domain":"attacker.myshopify.com"}"#;
        let result = signed_shop_domain(&headers("victim.myshopify.com"), body);
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_header_alone_is_not_enough() {
        let result = signed_shop_domain(&headers("victim.myshopify.com"), b"{}");
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_malformed_body_rejected() {
        let result = signed_shop_domain(&HeaderMap::new(), b"not json");
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
