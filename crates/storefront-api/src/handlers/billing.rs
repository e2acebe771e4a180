//! Billing handlers
//!
//! Author: hephaex@gmail.com

use crate::audit::{audit_log, AuditEvent};
use crate::auth::{AuthorizationContext, SelectPlanRequest, SessionResponse};
use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::State, response::IntoResponse, Extension, Json};
use std::sync::Arc;

/// Choose a billing plan; requires a connected store
#[utoipa::path(
    post,
    path = "/api/v1/billing/plan",
    tag = "billing",
    request_body = SelectPlanRequest,
    responses(
        (status = 200, description = "Plan selected", body = SessionResponse),
        (status = 400, description = "Missing plan id", body = crate::error::ApiError),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Store connection required"),
    ),
    security(("session_token" = []))
)]
pub async fn select_plan_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthorizationContext>,
    Json(request): Json<SelectPlanRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.auth_service.select_plan(&context, request).await?;

    audit_log(&AuditEvent::PlanSelected {
        user_id: context.user_id.clone(),
        plan_id: session.user.plan_id.clone().unwrap_or_default(),
    });

    Ok(Json(session))
}
