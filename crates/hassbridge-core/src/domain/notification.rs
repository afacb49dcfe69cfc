//! Notification messages and per-channel delivery results

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Chat channels a notification can be delivered to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Slack,
    Telegram,
    Discord,
    Line,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Telegram => "telegram",
            Self::Discord => "discord",
            Self::Line => "line",
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What produced a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSource {
    Event,
    Schedule,
    Manual,
}

/// A message handed to the notification fan-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    pub source: NotificationSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl NotificationMessage {
    pub fn new(text: impl Into<String>, source: NotificationSource) -> Self {
        Self {
            text: text.into(),
            markdown: None,
            source,
            metadata: None,
        }
    }

    /// Markdown message whose plain text is the same string
    pub fn markdown(text: impl Into<String>, source: NotificationSource) -> Self {
        let text = text.into();
        Self {
            markdown: Some(text.clone()),
            text,
            source,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Body preferred by rich-text channels
    pub fn rich_body(&self) -> &str {
        self.markdown.as_deref().unwrap_or(&self.text)
    }
}

/// Outcome of one adapter's delivery attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationResult {
    pub channel: ChannelType,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotificationResult {
    pub fn delivered(channel: ChannelType) -> Self {
        Self {
            channel,
            success: true,
            error: None,
        }
    }

    pub fn failed(channel: ChannelType, error: impl Into<String>) -> Self {
        Self {
            channel,
            success: false,
            error: Some(error.into()),
        }
    }
}
