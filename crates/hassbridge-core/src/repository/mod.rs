//! Repository traits for data access
//!
//! These traits define the interface for persisted state without specifying
//! the implementation (JSON files, in-memory, etc.)

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::domain::{CredentialRecord, EventSubscription};

/// Result type for repository operations
pub type RepoResult<T> = anyhow::Result<T>;

/// Storage for the single OAuth credential record
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Read the record; `None` when the file or the record key is absent
    async fn load(&self) -> RepoResult<Option<CredentialRecord>>;

    /// Persist the record, keeping every other field of the backing file
    async fn save(&self, record: &CredentialRecord) -> RepoResult<()>;
}

/// Read-side view of the subscription rules used by event matching
pub trait RuleSource: Send + Sync {
    /// Snapshot of all rules
    fn rules(&self) -> Vec<EventSubscription>;

    /// Snapshot of enabled rules
    fn enabled_rules(&self) -> Vec<EventSubscription> {
        self.rules().into_iter().filter(|r| r.enabled).collect()
    }

    /// Event types of the enabled rules
    fn active_event_types(&self) -> BTreeSet<String> {
        self.enabled_rules()
            .into_iter()
            .map(|r| r.event_type)
            .collect()
    }
}

/// A plain snapshot, e.g. the rules handed to a reload callback
impl RuleSource for Vec<EventSubscription> {
    fn rules(&self) -> Vec<EventSubscription> {
        self.clone()
    }
}
