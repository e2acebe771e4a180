//! Password reset delivery
//!
//! The account service creates reset tokens; a [`ResetNotifier`] carries
//! them to the account owner. The server binary uses
//! [`TracingResetNotifier`] until a mail transport is configured.

use async_trait::async_trait;
use thiserror::Error;

/// A reset token addressed to one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetNotice {
    pub user_id: String,
    pub username: String,
    /// Raw token; only its hash is stored
    pub token: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Reset notice could not be delivered: {0}")]
    Delivery(String),
}

/// Outbound channel for password reset tokens
#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn send_reset(&self, notice: &ResetNotice) -> Result<(), NotifyError>;
}

/// Writes reset notices to the `outbox` log target at DEBUG
pub struct TracingResetNotifier;

#[async_trait]
impl ResetNotifier for TracingResetNotifier {
    async fn send_reset(&self, notice: &ResetNotice) -> Result<(), NotifyError> {
        tracing::debug!(
            target: "outbox",
            user_id = %notice.user_id,
            username = %notice.username,
            token = %notice.token,
            "Password reset token issued"
        );
        Ok(())
    }
}
