//! Hub REST lookups
//!
//! Only what event prompts need: resolving an automation entity to its
//! stored configuration (actions, description).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use hassbridge_core::HubEndpoint;

use crate::error::HubResult;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Stored automation configuration (subset)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AutomationConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Newer hubs use `actions`, older ones `action`
    #[serde(default, alias = "action")]
    pub actions: Option<Value>,
}

#[async_trait]
pub trait AutomationLookup: Send + Sync {
    /// Configuration of the automation behind `entity_id`; `None` when it
    /// cannot be found. Lookup failures are logged, not returned.
    async fn automation_config(&self, entity_id: &str) -> Option<AutomationConfig>;
}

#[derive(Deserialize)]
struct EntityState {
    #[serde(default)]
    attributes: serde_json::Map<String, Value>,
}

pub struct HubRestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HubRestClient {
    pub fn new(endpoint: &HubEndpoint) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            token: endpoint.token.clone(),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> HubResult<T> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    async fn try_automation_config(&self, entity_id: &str) -> HubResult<Option<AutomationConfig>> {
        let state: EntityState = self.get_json(&format!("/api/states/{}", entity_id)).await?;
        let Some(id) = state.attributes.get("id").and_then(value_as_id) else {
            warn!(entity_id, "[HubRest] No automation id in entity attributes");
            return Ok(None);
        };

        let config = self
            .get_json::<AutomationConfig>(&format!("/api/config/automation/config/{}", id))
            .await?;
        Ok(Some(config))
    }
}

#[async_trait]
impl AutomationLookup for HubRestClient {
    async fn automation_config(&self, entity_id: &str) -> Option<AutomationConfig> {
        match self.try_automation_config(entity_id).await {
            Ok(config) => {
                debug!(entity_id, found = config.is_some(), "[HubRest] Automation lookup");
                config
            }
            Err(e) => {
                warn!(entity_id, error = %e, "[HubRest] Automation lookup failed");
                None
            }
        }
    }
}

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
