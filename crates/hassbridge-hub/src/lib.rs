//! Hub connectivity
//!
//! - `client` - realtime WebSocket client (auth, heartbeat, reconnect, resubscribe)
//! - `protocol` - JSON frames exchanged over the socket
//! - `policy` - reconnect backoff and heartbeat timing
//! - `rest` - REST lookups used to enrich event prompts
//! - `error` - error types

pub mod client;
pub mod error;
pub mod policy;
pub mod protocol;
pub mod rest;

pub use client::HubClient;
pub use error::HubError;
pub use policy::{HeartbeatPolicy, ReconnectPolicy};
pub use protocol::{IncomingMessage, OutgoingMessage};
pub use rest::{AutomationConfig, AutomationLookup, HubRestClient};
