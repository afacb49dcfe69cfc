//! OAuth credential record
//!
//! The record lives under a fixed key of the CLI's credential file. Besides the
//! three token fields it carries provider-supplied extras (scopes, rate-limit
//! tier, subscription type) that must survive every rewrite untouched.

use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::TokenResponse;

/// OAuth credential record as persisted on disk
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub access_token: String,

    /// A record without a refresh token cannot be refreshed and forces re-login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Expiry instant in Unix milliseconds
    #[serde(deserialize_with = "deserialize_expires_at")]
    pub expires_at: i64,

    /// Unknown fields, kept in file order
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CredentialRecord {
    /// Build a fresh record from a token endpoint response
    pub fn from_token_response(response: &TokenResponse, now: DateTime<Utc>) -> Self {
        let mut record = Self {
            access_token: String::new(),
            refresh_token: None,
            expires_at: 0,
            extra: Map::new(),
        };
        record.apply_token_response(response, now);
        record
    }

    /// Merge a token endpoint response into this record.
    ///
    /// Non-object response fields are copied in under their camelCase name
    /// (new values win), existing unknown fields are kept, and the token
    /// fields are overwritten. A response without `refresh_token` keeps the
    /// current one.
    pub fn apply_token_response(&mut self, response: &TokenResponse, now: DateTime<Utc>) {
        for (key, value) in &response.extra {
            if value.is_object() {
                continue;
            }
            self.extra.insert(snake_to_camel(key), value.clone());
        }

        self.access_token = response.access_token.clone();
        if let Some(refresh) = response.refresh_token.as_ref().filter(|t| !t.is_empty()) {
            self.refresh_token = Some(refresh.clone());
        }
        self.expires_at = (now + Duration::seconds(response.expires_in)).timestamp_millis();
    }

    /// Whether the record holds a usable refresh token
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Expiry as a UTC timestamp
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.expires_at).single()
    }

    /// Time left until expiry (negative once expired)
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        Duration::milliseconds(self.expires_at - now.timestamp_millis())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now.timestamp_millis()
    }

    /// True when the token expires within `threshold` (or already has)
    pub fn expires_within(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.remaining(now) <= threshold
    }

    /// Remaining lifetime in whole minutes, rounded and floored at zero
    pub fn remaining_minutes(&self, now: DateTime<Utc>) -> i64 {
        let ms = self.remaining(now).num_milliseconds().max(0);
        (ms as f64 / 60_000.0).round() as i64
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("extra_keys", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Convert `snake_case` response keys to the `camelCase` used on disk
pub fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for ch in key.chars() {
        if ch == '_' {
            upper_next = !out.is_empty();
            continue;
        }
        if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Older writers stored `expiresAt` as an ISO-8601 string; accept both forms.
fn deserialize_expires_at<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawExpiry {
        Millis(i64),
        Float(f64),
        Text(String),
    }

    match RawExpiry::deserialize(deserializer)? {
        RawExpiry::Millis(ms) => Ok(ms),
        RawExpiry::Float(ms) => Ok(ms as i64),
        RawExpiry::Text(text) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.timestamp_millis())
            .map_err(serde::de::Error::custom),
    }
}
