//! Daemon configuration from the process environment

use std::path::PathBuf;
use std::time::Duration;

use hassbridge_core::branding;
use hassbridge_core::{hub_endpoint, ConfigError, EnvironmentInfo, HubEndpoint};
use hassbridge_pipeline::prompt::DEFAULT_LANGUAGE;

const DEFAULT_CLAUDE_TIMEOUT_MS: u64 = 180_000;

#[derive(Clone)]
pub struct ListenerConfig {
    pub environment: EnvironmentInfo,
    pub hub: HubEndpoint,
    pub claude_timeout: Duration,
    pub language: String,
    pub log_dir: PathBuf,
    pub slack_bot_token: Option<String>,
    pub slack_default_channel: Option<String>,
}

impl ListenerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let environment = EnvironmentInfo::from_lookup(&lookup)?;
        let hub = hub_endpoint(&lookup)?;

        let claude_timeout = match get("CLAUDE_TIMEOUT_MS") {
            Some(raw) => {
                let ms = raw.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                    name: "CLAUDE_TIMEOUT_MS",
                    reason: e.to_string(),
                })?;
                if ms == 0 {
                    return Err(ConfigError::InvalidValue {
                        name: "CLAUDE_TIMEOUT_MS",
                        reason: "must be greater than zero".into(),
                    });
                }
                Duration::from_millis(ms)
            }
            None => Duration::from_millis(DEFAULT_CLAUDE_TIMEOUT_MS),
        };

        let log_dir = match get("HASSBRIDGE_LOG_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => branding::data_dir()
                .map(|d| d.join("logs"))
                .ok_or(ConfigError::NoDirectory("HASSBRIDGE_LOG_DIR"))?,
        };

        Ok(Self {
            environment,
            hub,
            claude_timeout,
            language: get("NOTIFY_LANGUAGE").unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            log_dir,
            slack_bot_token: get("SLACK_BOT_TOKEN"),
            slack_default_channel: get("SLACK_DEFAULT_CHANNEL"),
        })
    }

    /// Shown in the re-login notification
    pub fn relogin_hint(&self) -> String {
        format!(
            "CLAUDE_CONFIG_DIR={} claude login",
            self.environment.claude_config_dir.display()
        )
    }
}

impl std::fmt::Debug for ListenerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerConfig")
            .field("environment", &self.environment)
            .field("hub", &self.hub)
            .field("claude_timeout", &self.claude_timeout)
            .field("language", &self.language)
            .field("log_dir", &self.log_dir)
            .field("slack_bot_token", &self.slack_bot_token.as_ref().map(|_| "[REDACTED]"))
            .field("slack_default_channel", &self.slack_default_channel)
            .finish()
    }
}
