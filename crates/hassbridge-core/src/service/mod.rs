//! Domain services and the collaborator seams between crates

mod notification;
mod slack;

pub use notification::{NotificationAdapter, NotificationManager, SendOptions};
pub use slack::SlackAdapter;

use async_trait::async_trait;

use crate::domain::{NotificationMessage, NotificationResult, RefreshOutcome};

/// Supplies a valid OAuth access token before dependent work runs
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Refresh only if the stored token is expired or about to expire
    async fn ensure_valid_token(&self) -> RefreshOutcome;

    /// Refresh unless the stored token is still comfortably valid
    async fn refresh_token(&self) -> RefreshOutcome;
}

/// Delivers user-facing notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, message: NotificationMessage) -> Vec<NotificationResult>;
}
