//! Slack adapter posting via `chat.postMessage`

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::NotificationAdapter;
use crate::domain::{ChannelType, NotificationMessage, NotificationResult};

const SLACK_API_BASE: &str = "https://slack.com/api";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct SlackAdapter {
    client: reqwest::Client,
    bot_token: Option<String>,
    default_channel: Option<String>,
    api_base: String,
}

impl SlackAdapter {
    pub fn new(bot_token: Option<String>, default_channel: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            bot_token: bot_token.filter(|t| !t.is_empty()),
            default_channel: default_channel.filter(|c| !c.is_empty()),
            api_base: SLACK_API_BASE.to_string(),
        }
    }

    /// Point the adapter at a different API root (tests, proxies)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    async fn post_message(&self, token: &str, channel: &str, text: &str) -> Result<(), String> {
        let url = format!("{}/chat.postMessage", self.api_base);
        let payload = json!({
            "channel": channel,
            "text": text,
            "mrkdwn": true,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("Content-Type", "application/json; charset=utf-8")
            .json(&payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status, body));
        }

        let body: Value = response.json().await.map_err(|e| e.to_string())?;
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let error = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            return Err(error.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationAdapter for SlackAdapter {
    fn channel(&self) -> ChannelType {
        ChannelType::Slack
    }

    fn is_configured(&self) -> bool {
        self.bot_token.is_some() && self.default_channel.is_some()
    }

    async fn send(
        &self,
        message: &NotificationMessage,
        target: Option<&str>,
    ) -> NotificationResult {
        let channel = target.or(self.default_channel.as_deref());
        let (Some(token), Some(channel)) = (self.bot_token.as_deref(), channel) else {
            return NotificationResult::failed(
                ChannelType::Slack,
                "Slack not configured (missing SLACK_BOT_TOKEN or SLACK_DEFAULT_CHANNEL)",
            );
        };

        debug!(channel, "[Slack] Posting message");
        match self.post_message(token, channel, message.rich_body()).await {
            Ok(()) => {
                info!(channel, "[Slack] Message sent");
                NotificationResult::delivered(ChannelType::Slack)
            }
            Err(error) => NotificationResult::failed(ChannelType::Slack, error),
        }
    }
}
