//! HassBridge Storage Layer
//!
//! Plain JSON files, read-modify-written whole.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 Repository Traits                    │
//! │       (CredentialRepository, RuleSource)             │
//! ├──────────────────────────────────────────────────────┤
//! │  JsonCredentialStore     │  SubscriptionRegistry     │
//! │  (.credentials.json)     │  (event_subscriptions.json│
//! │                          │   + debounced watch)      │
//! ├──────────────────────────────────────────────────────┤
//! │           atomic write (temp file + rename)          │
//! └──────────────────────────────────────────────────────┘
//! ```

mod credential_file;
mod fs_util;
mod subscription_store;
pub mod watcher;

pub use credential_file::JsonCredentialStore;
pub use subscription_store::{ReloadOutcome, SubscriptionRegistry, RELOAD_DEBOUNCE};
