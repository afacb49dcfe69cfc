//! Domain Events - lifecycle facts published on the event bus
//!
//! Components emit these after something observable happened (a refresh, a
//! reconnect, a queue decision). Consumers (daemon audit log, tests) subscribe
//! and decide which ones they care about.
//!
//! # Serialization
//!
//! Events serialize with a `type` field containing the snake_case variant name:
//! ```json
//! { "type": "event_dropped", "event_type": "state_changed", "rule": "doors" }
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    // ════════════════════════════════════════════════════════════════════════
    // TOKEN LIFECYCLE
    // ════════════════════════════════════════════════════════════════════════

    /// Stored credential now valid until `expires_at` (Unix ms)
    TokenRefreshed {
        expires_at: i64,
        /// Another process refreshed it first (detected after `invalid_grant`)
        concurrent: bool,
    },

    /// Refresh token rejected; manual login needed
    ReloginRequired { message: String },

    // ════════════════════════════════════════════════════════════════════════
    // HUB CONNECTION
    // ════════════════════════════════════════════════════════════════════════

    HubConnected { url: String },

    /// Reconnected and resubscribed `event_types`
    HubReconnected { event_types: Vec<String> },

    /// Gave up reconnecting after `attempts`
    HubConnectionFailed { attempts: u32 },

    HubAuthFailed { message: String },

    // ════════════════════════════════════════════════════════════════════════
    // RULES & PIPELINE
    // ════════════════════════════════════════════════════════════════════════

    /// Rule file reloaded after an external change
    RulesReloaded { count: usize },

    EventQueued {
        event_type: String,
        rule: String,
        queue_len: usize,
    },

    /// Oldest queued task discarded because the queue was full
    EventDropped { event_type: String, rule: String },

    EventProcessed {
        event_type: String,
        rule: String,
        success: bool,
    },
}

impl DomainEvent {
    /// Get the event type name (for logging/filtering)
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::TokenRefreshed { .. } => "token_refreshed",
            Self::ReloginRequired { .. } => "relogin_required",
            Self::HubConnected { .. } => "hub_connected",
            Self::HubReconnected { .. } => "hub_reconnected",
            Self::HubConnectionFailed { .. } => "hub_connection_failed",
            Self::HubAuthFailed { .. } => "hub_auth_failed",
            Self::RulesReloaded { .. } => "rules_reloaded",
            Self::EventQueued { .. } => "event_queued",
            Self::EventDropped { .. } => "event_dropped",
            Self::EventProcessed { .. } => "event_processed",
        }
    }

    /// Rule name for pipeline events
    pub fn rule(&self) -> Option<&str> {
        match self {
            Self::EventQueued { rule, .. }
            | Self::EventDropped { rule, .. }
            | Self::EventProcessed { rule, .. } => Some(rule),
            _ => None,
        }
    }

    /// Whether this event signals something a human should look at
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            Self::ReloginRequired { .. }
                | Self::HubConnectionFailed { .. }
                | Self::HubAuthFailed { .. }
                | Self::EventDropped { .. }
        )
    }
}
