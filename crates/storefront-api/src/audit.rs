//! Security audit logging for session and account events
//!
//! Every event is logged at INFO level with the "audit" target so it can be
//! filtered and routed to security monitoring separately from request logs.
//! The full event is attached as JSON; the precise reason for a rejected
//! session lives here and never in the HTTP response.
//!
//! ```ignore
//! use storefront_api::audit::{audit_log, AuditEvent};
//!
//! audit_log(&AuditEvent::LoginSuccess {
//!     user_id: user.id.clone(),
//!     username: user.username.clone(),
//!     ip_address: Some("192.168.1.1".to_string()),
//!     user_agent: None,
//! });
//! ```
//!
//! Author: hephaex@gmail.com

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    LoginSuccess {
        user_id: String,
        username: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Login refused; the reason is not echoed to the client
    LoginFailure {
        username: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    SignupSuccess {
        user_id: String,
        username: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    SignupFailure {
        username: String,
        reason: String,
        ip_address: Option<String>,
    },

    /// The session guard turned a request away
    SessionRejected {
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Valid session lacking a store connection or plan
    AccessDenied {
        user_id: String,
        requirement: String,
        path: String,
        ip_address: Option<String>,
    },

    PasswordChange {
        user_id: String,
        ip_address: Option<String>,
    },

    PasswordResetRequested {
        user_id: String,
    },

    /// Completed reset; outstanding sessions were invalidated
    PasswordReset {
        user_id: String,
    },

    StoreConnected {
        user_id: String,
        shop_domain: String,
    },

    /// App uninstalled for a shop
    StoreRevoked {
        shop_domain: String,
        affected_users: usize,
    },

    PlanSelected {
        user_id: String,
        plan_id: String,
    },

    /// Query or webhook HMAC did not verify
    SignatureRejected {
        kind: String,
        reason: String,
        path: String,
        ip_address: Option<String>,
    },
}

impl AuditEvent {
    fn summary(&self) -> &'static str {
        match self {
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::SignupSuccess { .. } => "Signup successful",
            AuditEvent::SignupFailure { .. } => "Signup failed",
            AuditEvent::SessionRejected { .. } => "Session rejected",
            AuditEvent::AccessDenied { .. } => "Access denied",
            AuditEvent::PasswordChange { .. } => "Password changed",
            AuditEvent::PasswordResetRequested { .. } => "Password reset requested",
            AuditEvent::PasswordReset { .. } => "Password reset completed",
            AuditEvent::StoreConnected { .. } => "Store connected",
            AuditEvent::StoreRevoked { .. } => "Store disconnected",
            AuditEvent::PlanSelected { .. } => "Plan selected",
            AuditEvent::SignatureRejected { .. } => "Signature rejected",
        }
    }

    /// Subject of the event, when one is known
    pub fn user_id(&self) -> Option<&str> {
        match self {
            AuditEvent::LoginSuccess { user_id, .. }
            | AuditEvent::SignupSuccess { user_id, .. }
            | AuditEvent::AccessDenied { user_id, .. }
            | AuditEvent::PasswordChange { user_id, .. }
            | AuditEvent::PasswordResetRequested { user_id }
            | AuditEvent::PasswordReset { user_id }
            | AuditEvent::StoreConnected { user_id, .. }
            | AuditEvent::PlanSelected { user_id, .. } => Some(user_id),
            _ => None,
        }
    }
}

/// Log a security audit event
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();
    let event_json = serde_json::to_string(event).unwrap_or_else(|_| format!("{event:?}"));

    info!(
        target: "audit",
        timestamp = %timestamp,
        event = %event_json,
        user_id = ?event.user_id(),
        "{}",
        event.summary()
    );
}

/// Client IP from X-Forwarded-For (first hop) or X-Real-IP
pub fn extract_ip_address(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            if let Some(first_ip) = xff_str.split(',').next() {
                return Some(first_ip.trim().to_string());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return Some(ip_str.to_string());
        }
    }

    None
}

pub fn extract_user_agent(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::SessionRejected {
            reason: "session invalidated".to_string(),
            ip_address: Some("192.168.1.1".to_string()),
            user_agent: None,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"session_rejected\""));
        assert!(json.contains("session invalidated"));
    }

    #[test]
    fn test_event_subject() {
        let event = AuditEvent::StoreConnected {
            user_id: "user-1".to_string(),
            shop_domain: "a.myshopify.com".to_string(),
        };
        assert_eq!(event.user_id(), Some("user-1"));

        let event = AuditEvent::StoreRevoked {
            shop_domain: "a.myshopify.com".to_string(),
            affected_users: 2,
        };
        assert_eq!(event.user_id(), None);
    }

    #[test]
    fn test_audit_log_does_not_panic() {
        audit_log(&AuditEvent::LoginFailure {
            username: "alice".to_string(),
            reason: "Invalid password".to_string(),
            ip_address: Some("192.168.1.1".to_string()),
            user_agent: Some("Test Agent".to_string()),
        });
        audit_log(&AuditEvent::SignatureRejected {
            kind: "webhook".to_string(),
            reason: "Signature does not match".to_string(),
            path: "/webhooks/app/uninstalled".to_string(),
            ip_address: None,
        });
    }

    #[test]
    fn test_extract_ip_from_x_forwarded_for() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.1, 198.51.100.1".parse().unwrap(),
        );

        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_ip_from_x_real_ip() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.1".parse().unwrap());

        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_user_agent() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            axum::http::header::USER_AGENT,
            "Mozilla/5.0 (Test)".parse().unwrap(),
        );

        assert_eq!(
            extract_user_agent(&headers),
            Some("Mozilla/5.0 (Test)".to_string())
        );
    }

    #[test]
    fn test_extract_missing_headers() {
        let headers = axum::http::HeaderMap::new();

        assert_eq!(extract_ip_address(&headers), None);
        assert_eq!(extract_user_agent(&headers), None);
    }
}
