//! Shopify store handlers
//!
//! Author: hephaex@gmail.com

use crate::audit::{audit_log, AuditEvent};
use crate::auth::{AuthorizationContext, ConnectStoreRequest, SessionResponse};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storefront_core::UserSelector;
use utoipa::{IntoParams, ToSchema};

/// Launch parameters sent by Shopify when the app is opened, alongside
/// their `hmac`
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LaunchParams {
    pub shop: String,
    pub timestamp: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LaunchResponse {
    pub shop: String,
    /// Some account holds a live connection to this shop
    pub installed: bool,
}

/// Attach the store connection obtained from the OAuth exchange
///
/// Answers with a fresh session token that carries the access token sealed.
#[utoipa::path(
    post,
    path = "/api/v1/shopify/connect",
    tag = "shopify",
    request_body = ConnectStoreRequest,
    responses(
        (status = 200, description = "Store connected", body = SessionResponse),
        (status = 400, description = "Invalid shop domain or token", body = crate::error::ApiError),
        (status = 401, description = "Unauthorized"),
    ),
    security(("session_token" = []))
)]
pub async fn connect_store_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthorizationContext>,
    Json(request): Json<ConnectStoreRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.auth_service.connect_store(&context, request).await?;

    audit_log(&AuditEvent::StoreConnected {
        user_id: context.user_id.clone(),
        shop_domain: session.user.shop_domain.clone().unwrap_or_default(),
    });

    Ok(Json(session))
}

/// App launch from the Shopify admin; the query signature is checked by the
/// query signature guard before this runs
#[utoipa::path(
    get,
    path = "/api/v1/shopify/launch",
    tag = "shopify",
    params(LaunchParams),
    responses(
        (status = 200, description = "Authentic launch", body = LaunchResponse),
        (status = 401, description = "Bad signature"),
    )
)]
pub async fn launch_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LaunchParams>,
) -> Result<impl IntoResponse, AppError> {
    let shop = params.shop.trim().to_ascii_lowercase();
    tracing::debug!(shop = %shop, timestamp = ?params.timestamp, "App launch");

    let installed = state
        .store
        .find(&UserSelector::shop_domain(shop.clone()))
        .await?
        .iter()
        .any(|user| user.has_store_connection());

    Ok(Json(LaunchResponse { shop, installed }))
}

/// Authorization context of a session with a connected store and a plan
#[utoipa::path(
    get,
    path = "/api/v1/shop/session",
    tag = "shopify",
    responses(
        (status = 200, description = "Current authorization context", body = AuthorizationContext),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Store or plan required"),
    ),
    security(("session_token" = []))
)]
pub async fn shop_session_handler(
    Extension(context): Extension<AuthorizationContext>,
) -> impl IntoResponse {
    Json(context)
}
