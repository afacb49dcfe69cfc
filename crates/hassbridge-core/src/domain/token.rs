//! Token endpoint responses and refresh outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Successful response from the OAuth token endpoint
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds
    pub expires_in: i64,
    /// Everything else the provider sent (`token_type`, `scope`, account info, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("expires_in", &self.expires_in)
            .field("extra_keys", &self.extra.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Error body returned by the token endpoint on failure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Result of `ensure_valid_token` / `refresh_token`.
///
/// Refresh never fails with an error; every failure is folded in here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub success: bool,
    pub message: String,
    /// Expiry of the token now on disk (Unix ms)
    pub expires_at: Option<i64>,
    pub needs_relogin: bool,
}

impl RefreshOutcome {
    pub fn ok(message: impl Into<String>, expires_at: i64) -> Self {
        Self {
            success: true,
            message: message.into(),
            expires_at: Some(expires_at),
            needs_relogin: false,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            expires_at: None,
            needs_relogin: false,
        }
    }

    pub fn relogin(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            expires_at: None,
            needs_relogin: true,
        }
    }
}

/// Snapshot of the stored token, used by the periodic check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenStatus {
    pub has_credentials: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_expired: bool,
    pub is_expiring_soon: bool,
    pub remaining_minutes: i64,
}

impl TokenStatus {
    pub fn needs_refresh(&self) -> bool {
        self.has_credentials && (self.is_expired || self.is_expiring_soon)
    }
}
