//! # HassBridge Core Library
//!
//! Domain types and shared services for the hub event notification daemon.
//!
//! ## Modules
//!
//! - `branding` - Product naming and well-known file names
//! - `domain` - Credential record, hub events, subscription rules, notifications
//! - `environment` - Add-on vs standalone detection and hub endpoint config
//! - `repository` - Data access traits
//! - `service` - Notification fan-out and cross-crate collaborator traits
//! - `event_bus` - Lifecycle event distribution

pub mod branding;
pub mod domain;
pub mod environment;
pub mod event_bus;
pub mod repository;
pub mod service;

pub use domain::*;
pub use environment::{hub_endpoint, ConfigError, EnvironmentInfo, HubEndpoint};
pub use event_bus::{EventBus, EventReceiver, EventSender};
pub use repository::*;
pub use service::*;
