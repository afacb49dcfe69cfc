//! Event subscription rules and entity filter matching
//!
//! A rule selects hub events by exact event type and, optionally, by an
//! ordered list of glob patterns over the event's entity id. Patterns
//! starting with `!` exclude; the rest include.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::HubEvent;

/// Persisted event subscription rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSubscription {
    pub id: String,
    pub name: String,
    pub event_type: String,
    #[serde(default)]
    pub entity_filter: Option<Vec<String>>,
    /// Free text handed to notification generation
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl EventSubscription {
    /// Create a rule with a fresh id
    pub fn new(input: NewSubscription) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            event_type: input.event_type,
            entity_filter: input.entity_filter,
            description: input.description,
            enabled: input.enabled,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update; `id` and `created_at` never change
    pub fn apply(&mut self, patch: SubscriptionPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(event_type) = patch.event_type {
            self.event_type = event_type;
        }
        if let Some(filter) = patch.entity_filter {
            self.entity_filter = filter;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        self.updated_at = Utc::now();
    }

    /// Does this rule select the event? Ignores `enabled`.
    pub fn matches(&self, event: &HubEvent) -> bool {
        if self.event_type != event.event_type {
            return false;
        }
        match self.entity_filter.as_deref() {
            Some(filter) if !filter.is_empty() => {
                entity_filter_accepts(filter, event.entity_id().unwrap_or(""))
            }
            _ => true,
        }
    }
}

/// Fields for creating a rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubscription {
    pub name: String,
    pub event_type: String,
    #[serde(default)]
    pub entity_filter: Option<Vec<String>>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl NewSubscription {
    pub fn new(name: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            event_type: event_type.into(),
            entity_filter: None,
            description: String::new(),
            enabled: true,
        }
    }

    pub fn with_entity_filter<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entity_filter = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Partial update of a rule. `entity_filter: Some(None)` clears the filter.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionPatch {
    pub name: Option<String>,
    pub event_type: Option<String>,
    pub entity_filter: Option<Option<Vec<String>>>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
}

/// Evaluate an entity filter.
///
/// Any matching exclude pattern rejects. If include patterns exist, at least
/// one must match.
pub fn entity_filter_accepts(filter: &[String], entity_id: &str) -> bool {
    let (excludes, includes): (Vec<&str>, Vec<&str>) = filter
        .iter()
        .map(String::as_str)
        .partition(|p| p.starts_with('!'));

    if excludes
        .iter()
        .any(|p| matches_wildcard(&p[1..], entity_id))
    {
        return false;
    }

    includes.is_empty() || includes.iter().any(|p| matches_wildcard(p, entity_id))
}

/// Match `text` against a glob pattern where `*` is any run and `?` one char.
/// Patterns without wildcards compare exactly.
pub fn matches_wildcard(pattern: &str, text: &str) -> bool {
    if !pattern.contains(['*', '?']) {
        return pattern == text;
    }

    let translated = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    match Regex::new(&format!("^{}$", translated)) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            warn!(pattern, error = %e, "[Rules] Invalid entity filter pattern");
            false
        }
    }
}
