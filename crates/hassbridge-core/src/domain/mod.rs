//! Domain entities, value objects, and events
//!
//! - Credential record and token endpoint types
//! - Hub events and subscription rules (with entity filter matching)
//! - Notification messages
//! - Domain Events (DomainEvent enum for the event bus)

mod credential;
mod event;
mod hub_event;
mod notification;
mod subscription;
mod token;

pub use credential::{snake_to_camel, CredentialRecord};
pub use event::DomainEvent;
pub use hub_event::HubEvent;
pub use notification::*;
pub use subscription::*;
pub use token::*;
