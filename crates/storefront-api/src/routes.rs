//! API route definitions
//!
//! Author: hephaex@gmail.com

use crate::auth::{
    query_signature_guard, require_plan, require_store_connection, session_guard,
    webhook_signature_guard,
};
use crate::handlers::{auth, billing, health, shopify, webhooks};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// Create API v1 routes
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no session required)
    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/password/forgot", post(auth::forgot_password_handler))
        .route("/auth/password/reset", post(auth::reset_password_handler));

    // Session + verified store
    let store_routes = Router::new()
        .route("/billing/plan", post(billing::select_plan_handler))
        .route_layer(middleware::from_fn(require_store_connection));

    // Session + verified store + plan
    let plan_routes = Router::new()
        .route("/shop/session", get(shopify::shop_session_handler))
        .route_layer(middleware::from_fn(require_plan));

    // The session guard wraps the store and plan guards, so it runs first
    let session_routes = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .route("/auth/password", put(auth::change_password_handler))
        .route("/shopify/connect", post(shopify::connect_store_handler))
        .merge(store_routes)
        .merge(plan_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), session_guard));

    // Signed by Shopify, no session
    let signed_routes = Router::new()
        .route("/shopify/launch", get(shopify::launch_handler))
        .route_layer(middleware::from_fn_with_state(state, query_signature_guard));

    Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .merge(signed_routes)
}

/// Shopify webhook routes
pub fn webhook_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/app/uninstalled", post(webhooks::app_uninstalled_handler))
        .route_layer(middleware::from_fn_with_state(state, webhook_signature_guard))
}

/// OpenAPI document served at `/api-docs/openapi.json`
#[derive(OpenApi)]
#[openapi(
    info(title = "Storefront API"),
    paths(
        health::health_check,
        auth::signup_handler,
        auth::login_handler,
        auth::me_handler,
        auth::change_password_handler,
        auth::forgot_password_handler,
        auth::reset_password_handler,
        shopify::connect_store_handler,
        shopify::launch_handler,
        shopify::shop_session_handler,
        billing::select_plan_handler,
        webhooks::app_uninstalled_handler,
    ),
    components(schemas(
        crate::error::ApiError,
        crate::auth::AuthorizationContext,
        crate::auth::SignupRequest,
        crate::auth::LoginRequest,
        crate::auth::ChangePasswordRequest,
        crate::auth::ForgotPasswordRequest,
        crate::auth::ResetPasswordRequest,
        crate::auth::ConnectStoreRequest,
        crate::auth::SelectPlanRequest,
        crate::auth::ProfileInfo,
        crate::auth::SessionResponse,
        health::HealthResponse,
        auth::MessageResponse,
        shopify::LaunchResponse,
        webhooks::UninstalledPayload,
        webhooks::UninstalledResponse,
    )),
    modifiers(&SessionTokenScheme),
    tags(
        (name = "health", description = "Liveness"),
        (name = "auth", description = "Accounts and sessions"),
        (name = "shopify", description = "Store connection"),
        (name = "billing", description = "Plan selection"),
        (name = "webhooks", description = "Shopify webhooks"),
    )
)]
pub struct ApiDoc;

struct SessionTokenScheme;

impl Modify for SessionTokenScheme {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "session_token",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-storefront-token"))),
            );
        }
    }
}
