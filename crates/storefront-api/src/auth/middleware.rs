//! Route guards for session and machine-to-machine requests
//!
//! Session pipeline per request, strictly in order:
//! 1. the configured token header must be present and non-empty
//! 2. the token must verify (signature, shape, expiry)
//! 3. the invalidation gate must not veto the subject
//! 4. sealed claims are unsealed and the resulting [`AuthorizationContext`]
//!    is attached to the request extensions
//!
//! Any failure short-circuits with a 401 whose body never says which step
//! failed; the reason goes to the audit log. Store and plan guards layer on
//! top of an authorized session and answer 403.
use super::gate::InvalidationGate;
use super::signature::{check_freshness, check_signature, SignedPayload};
use super::token::{TokenCodec, TokenError, Unsealed};
use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{HeaderMap, HeaderName, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;

/// Identity and authorization state derived from a verified session token
///
/// Added to request extensions by [`session_guard`]; extract it in handlers
/// with `Extension<AuthorizationContext>`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthorizationContext {
    pub user_id: String,
    pub username: Option<String>,
    pub shop_domain: Option<String>,
    pub plan_id: Option<String>,
    pub permissions: Vec<String>,
    pub shop_verified: bool,
    pub expires_at: DateTime<Utc>,
    /// Unsealed values that have no plain claim, e.g. the store access token
    #[serde(skip)]
    pub secrets: BTreeMap<String, String>,
}

impl AuthorizationContext {
    /// Verified store connection on the token
    pub fn has_verified_store(&self) -> bool {
        self.shop_verified && self.shop_domain.is_some()
    }

    pub fn has_plan(&self) -> bool {
        self.plan_id.as_deref().is_some_and(|p| !p.is_empty())
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    /// An unsealed value by field name
    pub fn secret(&self, name: &str) -> Option<&str> {
        self.secrets.get(name).map(String::as_str)
    }
}

impl From<Unsealed> for AuthorizationContext {
    fn from(unsealed: Unsealed) -> Self {
        let expires_at = unsealed.claims.expires_at();
        let claims = unsealed.claims;
        Self {
            user_id: claims.sub,
            username: claims.username,
            shop_domain: claims.shop_domain,
            plan_id: claims.plan_id,
            permissions: claims.permissions,
            shop_verified: claims.shop_verified,
            expires_at,
            secrets: unsealed.secrets,
        }
    }
}

/// Why a guard turned a request away
#[derive(Debug, Error)]
pub enum GuardRejection {
    #[error("missing header")]
    MissingHeader,

    #[error("invalid or expired token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("session invalidated")]
    SessionInvalidated,

    #[error("store connection required")]
    StoreNotConnected,

    #[error("plan selection required")]
    PlanRequired,

    #[error("bad {kind} signature: {reason}")]
    BadSignature { kind: &'static str, reason: String },
}

impl GuardRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            GuardRejection::StoreNotConnected | GuardRejection::PlanRequired => {
                StatusCode::FORBIDDEN
            }
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for GuardRejection {
    fn into_response(self) -> Response {
        let status = self.status();
        // Authentication failures share one body so the cause cannot be probed
        let (code, message) = match self {
            GuardRejection::StoreNotConnected => ("STORE_REQUIRED", "Store connection required"),
            GuardRejection::PlanRequired => ("PLAN_REQUIRED", "Plan selection required"),
            _ => ("UNAUTHORIZED", "Authentication required"),
        };

        let body = serde_json::json!({
            "code": code,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}

/// Session verification pipeline shared by every session-guarded route
#[derive(Clone)]
pub struct SessionGuard {
    codec: Arc<TokenCodec>,
    gate: InvalidationGate,
    header_name: HeaderName,
}

impl SessionGuard {
    pub fn new(codec: Arc<TokenCodec>, gate: InvalidationGate, header_name: HeaderName) -> Self {
        Self {
            codec,
            gate,
            header_name,
        }
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.header_name
    }

    /// Run the four guard steps against the request headers
    pub async fn authorize(
        &self,
        headers: &HeaderMap,
    ) -> Result<AuthorizationContext, GuardRejection> {
        let token = headers
            .get(&self.header_name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(GuardRejection::MissingHeader)?;

        let claims = self.codec.verify(token)?;

        if self.gate.is_invalidated(&claims.sub).await {
            return Err(GuardRejection::SessionInvalidated);
        }

        let unsealed = self.codec.unseal(claims);
        for failure in &unsealed.failures {
            tracing::warn!(
                user_id = %unsealed.claims.sub,
                field = %failure.field,
                error = %failure.error,
                "Dropping sealed claim that failed to unseal"
            );
        }

        Ok(AuthorizationContext::from(unsealed))
    }
}

/// Require a valid, non-invalidated session token
///
/// ```ignore
/// use axum::{middleware, routing::get, Router};
/// use storefront_api::auth::middleware::session_guard;
///
/// let app = Router::new()
///     .route("/protected", get(handler))
///     .route_layer(middleware::from_fn_with_state(state.clone(), session_guard));
/// ```
pub async fn session_guard(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, GuardRejection> {
    match state.guard.authorize(request.headers()).await {
        Ok(context) => {
            request.extensions_mut().insert(context);
            Ok(next.run(request).await)
        }
        Err(rejection) => {
            audit_log(&AuditEvent::SessionRejected {
                reason: rejection.to_string(),
                ip_address: extract_ip_address(request.headers()),
                user_agent: extract_user_agent(request.headers()),
            });
            Err(rejection)
        }
    }
}

/// Require a verified store connection; layer inside [`session_guard`]
pub async fn require_store_connection(
    request: Request<Body>,
    next: Next,
) -> Result<Response, GuardRejection> {
    require(request, next, "store_connection", |ctx| ctx.has_verified_store()).await
}

/// Require a verified store and a selected plan; layer inside [`session_guard`]
pub async fn require_plan(request: Request<Body>, next: Next) -> Result<Response, GuardRejection> {
    require(request, next, "plan", |ctx| {
        ctx.has_verified_store() && ctx.has_plan()
    })
    .await
}

async fn require(
    request: Request<Body>,
    next: Next,
    requirement: &str,
    check: impl Fn(&AuthorizationContext) -> bool,
) -> Result<Response, GuardRejection> {
    // Missing context means the session guard was not layered outside
    let Some(context) = request.extensions().get::<AuthorizationContext>() else {
        return Err(GuardRejection::MissingHeader);
    };

    if check(context) {
        return Ok(next.run(request).await);
    }

    audit_log(&AuditEvent::AccessDenied {
        user_id: context.user_id.clone(),
        requirement: requirement.to_string(),
        path: request.uri().path().to_string(),
        ip_address: extract_ip_address(request.headers()),
    });

    if context.has_verified_store() {
        Err(GuardRejection::PlanRequired)
    } else {
        Err(GuardRejection::StoreNotConnected)
    }
}

/// Require a valid HMAC over the query parameters (app launch, OAuth callback)
/// and a `timestamp` within the configured window
pub async fn query_signature_guard(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, GuardRejection> {
    let params = Query::<BTreeMap<String, String>>::try_from_uri(request.uri())
        .map(|Query(params)| params)
        .unwrap_or_default();

    let shopify = &state.config.shopify;
    let checked = check_signature(SignedPayload::Query(&params), &shopify.api_secret).and_then(
        |()| check_freshness(&params, Utc::now().timestamp(), shopify.launch_max_age_secs),
    );
    if let Err(e) = checked {
        return Err(reject_signature(&request, "query", e.to_string()));
    }

    Ok(next.run(request).await)
}

/// Require a valid HMAC over the raw webhook body
///
/// The body is buffered (bounded by the configured max body size), checked,
/// and handed on unchanged.
pub async fn webhook_signature_guard(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, GuardRejection> {
    let (parts, body) = request.into_parts();

    let bytes = match axum::body::to_bytes(body, state.config.server.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let request = Request::from_parts(parts, Body::empty());
            return Err(reject_signature(&request, "webhook", e.to_string()));
        }
    };

    let signature = parts
        .headers
        .get(state.config.shopify.webhook_header.as_str())
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let result = check_signature(
        SignedPayload::Webhook {
            body: &bytes,
            signature,
        },
        &state.config.shopify.api_secret,
    );

    let request = Request::from_parts(parts, Body::from(bytes));
    if let Err(e) = result {
        return Err(reject_signature(&request, "webhook", e.to_string()));
    }

    Ok(next.run(request).await)
}

fn reject_signature(request: &Request<Body>, kind: &'static str, reason: String) -> GuardRejection {
    audit_log(&AuditEvent::SignatureRejected {
        kind: kind.to_string(),
        reason: reason.clone(),
        path: request.uri().path().to_string(),
        ip_address: extract_ip_address(request.headers()),
    });
    GuardRejection::BadSignature { kind, reason }
}
