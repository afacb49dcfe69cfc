//! Notification fan-out
//!
//! Adapters are keyed by channel type; registering a second adapter for the
//! same channel replaces the first. Sends go out sequentially and every
//! selected adapter reports its own result.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::NotificationSink;
use crate::domain::{ChannelType, NotificationMessage, NotificationResult};

/// A single chat channel integration
#[async_trait]
pub trait NotificationAdapter: Send + Sync {
    fn channel(&self) -> ChannelType;

    /// Whether credentials and a default destination are present
    fn is_configured(&self) -> bool;

    /// Deliver to `target`, or the adapter's default destination
    async fn send(&self, message: &NotificationMessage, target: Option<&str>)
        -> NotificationResult;
}

/// Channel selection for a send
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Restrict delivery to these channels (all configured ones when `None`)
    pub channels: Option<Vec<ChannelType>>,
    /// Channel-specific destination overriding the adapter default
    pub target: Option<String>,
}

#[derive(Default)]
pub struct NotificationManager {
    adapters: Vec<Arc<dyn NotificationAdapter>>,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn NotificationAdapter>) -> Self {
        self.register_adapter(adapter);
        self
    }

    pub fn register_adapter(&mut self, adapter: Arc<dyn NotificationAdapter>) {
        info!(
            channel = %adapter.channel(),
            configured = adapter.is_configured(),
            "[Notify] Registered adapter"
        );
        self.adapters.retain(|a| a.channel() != adapter.channel());
        self.adapters.push(adapter);
    }

    /// Channels with a configured adapter
    pub fn configured_channels(&self) -> Vec<ChannelType> {
        self.adapters
            .iter()
            .filter(|a| a.is_configured())
            .map(|a| a.channel())
            .collect()
    }

    pub async fn send(
        &self,
        message: &NotificationMessage,
        options: &SendOptions,
    ) -> Vec<NotificationResult> {
        let selected: Vec<&Arc<dyn NotificationAdapter>> = match &options.channels {
            Some(channels) => channels
                .iter()
                .filter_map(|ch| self.adapters.iter().find(|a| a.channel() == *ch))
                .filter(|a| a.is_configured())
                .collect(),
            None => self.adapters.iter().filter(|a| a.is_configured()).collect(),
        };

        if selected.is_empty() {
            warn!("[Notify] No configured adapters available to send notification");
            return Vec::new();
        }

        let mut results = Vec::with_capacity(selected.len());
        for adapter in selected {
            let result = adapter.send(message, options.target.as_deref()).await;
            if let Some(error) = &result.error {
                warn!(channel = %result.channel, error = %error, "[Notify] Delivery failed");
            }
            results.push(result);
        }
        results
    }
}

#[async_trait]
impl NotificationSink for NotificationManager {
    async fn notify(&self, message: NotificationMessage) -> Vec<NotificationResult> {
        self.send(&message, &SendOptions::default()).await
    }
}
