//! Events delivered by the hub's realtime socket

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single hub event (`{"type": "event", "event": {...}}` payload)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubEvent {
    pub event_type: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_fired: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl HubEvent {
    pub fn new(event_type: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            origin: None,
            time_fired: Some(Utc::now()),
            context: None,
        }
    }

    /// Entity the event is about: `data.entity_id`, else `data.new_state.entity_id`
    pub fn entity_id(&self) -> Option<&str> {
        self.data
            .get("entity_id")
            .and_then(Value::as_str)
            .or_else(|| {
                self.data
                    .get("new_state")
                    .and_then(|s| s.get("entity_id"))
                    .and_then(Value::as_str)
            })
    }

    /// String field of `data`, if present
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}
