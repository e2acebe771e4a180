//! Account API handlers
//!
//! Signup, login and password management. Session-guarded handlers receive
//! the [`AuthorizationContext`] attached by the session guard.
//!
//! Author: hephaex@gmail.com

use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::auth::{
    AuthorizationContext, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest,
    ProfileInfo, ResetNotice, ResetPasswordRequest, SessionResponse, SignupRequest,
};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Generic acknowledgement
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// Create an account
///
/// * `201 Created` - account created, session token issued
/// * `400 Bad Request` - missing username or weak password
/// * `409 Conflict` - username taken
#[utoipa::path(
    post,
    path = "/api/v1/auth/signup",
    tag = "auth",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = SessionResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 409, description = "Username taken", body = crate::error::ApiError),
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let username = request.username.clone();

    match state.auth_service.signup(request).await {
        Ok(session) => {
            audit_log(&AuditEvent::SignupSuccess {
                user_id: session.user.id.clone(),
                username,
                ip_address: extract_ip_address(&headers),
                user_agent: extract_user_agent(&headers),
            });
            Ok((StatusCode::CREATED, Json(session)))
        }
        Err(e) => {
            audit_log(&AuditEvent::SignupFailure {
                username,
                reason: format!("{e:?}"),
                ip_address: extract_ip_address(&headers),
            });
            Err(e)
        }
    }
}

/// Log in with username and password
///
/// Unknown usernames and wrong passwords both answer 401.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = SessionResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let username = request.username.clone();

    match state.auth_service.login(request).await {
        Ok(session) => {
            audit_log(&AuditEvent::LoginSuccess {
                user_id: session.user.id.clone(),
                username,
                ip_address: extract_ip_address(&headers),
                user_agent: extract_user_agent(&headers),
            });
            Ok(Json(session))
        }
        Err(e) => {
            audit_log(&AuditEvent::LoginFailure {
                username,
                reason: format!("{e:?}"),
                ip_address: extract_ip_address(&headers),
                user_agent: extract_user_agent(&headers),
            });
            Err(e)
        }
    }
}

/// Current account as carried by the session token
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current profile", body = ProfileInfo),
        (status = 401, description = "Unauthorized"),
    ),
    security(("session_token" = []))
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthorizationContext>,
) -> impl IntoResponse {
    Json(state.auth_service.me(&context))
}

/// Change the password; answers with a fresh session token
#[utoipa::path(
    put,
    path = "/api/v1/auth/password",
    tag = "auth",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = SessionResponse),
        (status = 400, description = "Weak password", body = crate::error::ApiError),
        (status = 401, description = "Current password wrong or session invalid"),
    ),
    security(("session_token" = []))
)]
pub async fn change_password_handler(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthorizationContext>,
    headers: HeaderMap,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.auth_service.change_password(&context, request).await?;

    audit_log(&AuditEvent::PasswordChange {
        user_id: context.user_id.clone(),
        ip_address: extract_ip_address(&headers),
    });

    Ok(Json(session))
}

/// Request a password reset
///
/// Always answers 202 so the endpoint cannot be used to probe usernames.
/// The reset token goes to the account owner through the configured
/// [`crate::auth::ResetNotifier`]; a delivery failure is logged, not reported.
#[utoipa::path(
    post,
    path = "/api/v1/auth/password/forgot",
    tag = "auth",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 202, description = "Reset requested", body = MessageResponse),
    )
)]
pub async fn forgot_password_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let username = request.username.trim().to_string();

    if let Some((user_id, token)) = state.auth_service.begin_password_reset(request).await? {
        let notice = ResetNotice {
            user_id: user_id.clone(),
            username,
            token,
        };
        if let Err(e) = state.notifier.send_reset(&notice).await {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to deliver reset token");
        }
        audit_log(&AuditEvent::PasswordResetRequested { user_id });
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "If the account exists, reset instructions have been sent".to_string(),
        }),
    ))
}

/// Complete a password reset; every existing session must log in again
#[utoipa::path(
    post,
    path = "/api/v1/auth/password/reset",
    tag = "auth",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset", body = MessageResponse),
        (status = 400, description = "Invalid or expired token", body = crate::error::ApiError),
    )
)]
pub async fn reset_password_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = state.auth_service.complete_password_reset(request).await?;

    audit_log(&AuditEvent::PasswordReset { user_id });

    Ok(Json(MessageResponse {
        message: "Password has been reset, please log in".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_response_serialization() {
        let response = MessageResponse {
            message: "done".to_string(),
        };

        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"message":"done"}"#);
    }
}
