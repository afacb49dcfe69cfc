//! Runtime environment detection
//!
//! Two deployment shapes are supported: running as a hub add-on (the
//! supervisor injects `SUPERVISOR_TOKEN` and proxies the hub API) and running
//! standalone against `HA_URL`/`HA_TOKEN`.

use std::path::PathBuf;

use thiserror::Error;

use crate::branding;

/// Hub API root when running as an add-on
pub const SUPERVISOR_URL: &str = "http://supervisor/core";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("hub connection is not configured: set SUPERVISOR_TOKEN or both HA_URL and HA_TOKEN")]
    MissingHubConfig,

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("cannot determine {0}: no home or data directory available")]
    NoDirectory(&'static str),
}

/// Where and how the hub is reached
#[derive(Clone, PartialEq, Eq)]
pub struct HubEndpoint {
    /// REST root, e.g. `http://homeassistant.local:8123`
    pub url: String,
    pub token: String,
}

impl HubEndpoint {
    /// Realtime socket URL: scheme mapped to ws/wss, `/api/websocket` appended
    pub fn websocket_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/api/websocket", base)
    }
}

impl std::fmt::Debug for HubEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubEndpoint")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Detected runtime environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentInfo {
    pub is_addon: bool,
    /// CLI used for notification text generation
    pub claude_path: PathBuf,
    /// Directory holding the CLI's `.credentials.json`
    pub claude_config_dir: PathBuf,
    pub subscriptions_path: PathBuf,
}

impl EnvironmentInfo {
    /// Detect from the process environment
    pub fn detect() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Detect using an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let is_addon = get("SUPERVISOR_TOKEN").is_some();
        let home = dirs::home_dir();

        let claude_path = match get("CLAUDE_PATH") {
            Some(path) => PathBuf::from(path),
            None if is_addon => PathBuf::from("claude"),
            None => home
                .as_ref()
                .map(|h| h.join(".local/bin/claude"))
                .ok_or(ConfigError::NoDirectory("CLAUDE_PATH"))?,
        };

        let claude_config_dir = match get("CLAUDE_CONFIG_DIR") {
            Some(dir) => PathBuf::from(dir),
            None if is_addon => PathBuf::from("/data/claude"),
            None => home
                .as_ref()
                .map(|h| h.join(".claude"))
                .ok_or(ConfigError::NoDirectory("CLAUDE_CONFIG_DIR"))?,
        };

        let subscriptions_path = match get("EVENT_SUBSCRIPTIONS_PATH") {
            Some(path) => PathBuf::from(path),
            None if is_addon => PathBuf::from("/data").join(branding::SUBSCRIPTIONS_FILE),
            None => branding::data_dir()
                .map(|d| d.join(branding::SUBSCRIPTIONS_FILE))
                .ok_or(ConfigError::NoDirectory("EVENT_SUBSCRIPTIONS_PATH"))?,
        };

        Ok(Self {
            is_addon,
            claude_path,
            claude_config_dir,
            subscriptions_path,
        })
    }

    /// Path of the OAuth credential file
    pub fn credentials_path(&self) -> PathBuf {
        self.claude_config_dir.join(branding::CREDENTIALS_FILE)
    }
}

/// Resolve the hub endpoint; add-on mode wins over `HA_URL`/`HA_TOKEN`
pub fn hub_endpoint<F>(lookup: F) -> Result<HubEndpoint, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(token) = get("SUPERVISOR_TOKEN") {
        return Ok(HubEndpoint {
            url: SUPERVISOR_URL.to_string(),
            token,
        });
    }

    match (get("HA_URL"), get("HA_TOKEN")) {
        (Some(url), Some(token)) => {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidValue {
                    name: "HA_URL",
                    reason: format!("expected an http(s) URL, got {}", url),
                });
            }
            Ok(HubEndpoint { url, token })
        }
        _ => Err(ConfigError::MissingHubConfig),
    }
}
