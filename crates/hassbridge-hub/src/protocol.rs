//! Realtime socket frames
//!
//! Every frame is a JSON object tagged by `type`. Commands sent after
//! authentication carry a client-chosen `id` that the hub echoes back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use hassbridge_core::HubEvent;

/// Client to hub
#[derive(Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    Auth {
        access_token: String,
    },
    SubscribeEvents {
        id: u64,
        event_type: String,
    },
    UnsubscribeEvents {
        id: u64,
        subscription: u64,
    },
    Ping {
        id: u64,
    },
}

impl OutgoingMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::SubscribeEvents { .. } => "subscribe_events",
            Self::UnsubscribeEvents { .. } => "unsubscribe_events",
            Self::Ping { .. } => "ping",
        }
    }
}

/// Hub to client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    Event {
        #[serde(default)]
        id: Option<u64>,
        event: HubEvent,
    },
    Pong {
        #[serde(default)]
        id: Option<u64>,
    },
    Result {
        #[serde(default)]
        id: Option<u64>,
        #[serde(default = "default_success")]
        success: bool,
        #[serde(default)]
        error: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

fn default_success() -> bool {
    true
}
