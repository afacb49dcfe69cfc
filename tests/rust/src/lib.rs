//! Shared test utilities and fixtures for HassBridge integration tests.

pub use hassbridge_core::{DomainEvent, EventSubscription, HubEvent, NewSubscription};

/// Scripted collaborators
pub mod mocks;
pub use mocks::{RecordingSink, ScriptedExecutor, ScriptedTokenProvider};

/// In-process hub speaking the realtime protocol
pub mod hub;
pub use hub::FakeHub;

/// Route client logs to the test harness output, filtered by `RUST_LOG`.
/// Safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Event testing utilities
pub mod events {
    use hassbridge_core::{DomainEvent, EventReceiver};
    use std::time::Duration;

    /// Wait for the first event matching `predicate`
    pub async fn wait_for_event<F>(
        rx: &mut EventReceiver,
        timeout: Duration,
        predicate: F,
    ) -> Option<DomainEvent>
    where
        F: Fn(&DomainEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }

            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(event)) if predicate(&event) => return Some(event),
                Ok(Some(_)) => continue, // Not the event we want
                Ok(None) => return None, // Bus gone
                Err(_) => return None,   // Timeout
            }
        }
    }
}

/// Test fixture utilities
pub mod fixtures {
    use chrono::{Duration, Utc};
    use hassbridge_core::{EventSubscription, HubEvent, NewSubscription};
    use serde_json::{json, Value};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Hub event with the given payload object
    pub fn hub_event(event_type: &str, data: Value) -> HubEvent {
        let Value::Object(map) = data else {
            panic!("event data must be a JSON object");
        };
        HubEvent::new(event_type, map)
    }

    pub fn automation_triggered(entity_id: &str, name: &str) -> HubEvent {
        hub_event(
            "automation_triggered",
            json!({ "entity_id": entity_id, "name": name, "source": "state of sun.sun" }),
        )
    }

    pub fn state_changed(entity_id: &str, old: &str, new: &str) -> HubEvent {
        hub_event(
            "state_changed",
            json!({
                "entity_id": entity_id,
                "old_state": { "entity_id": entity_id, "state": old },
                "new_state": { "entity_id": entity_id, "state": new }
            }),
        )
    }

    pub fn rule(name: &str, event_type: &str) -> EventSubscription {
        EventSubscription::new(
            NewSubscription::new(name, event_type).with_description(format!("Tell me about {}", name)),
        )
    }

    /// Credential file in a temporary CLI config directory
    pub struct CredentialFile {
        _temp_dir: TempDir,
        path: PathBuf,
    }

    impl CredentialFile {
        /// File holding a record that expires in `minutes`, plus provider
        /// extras and an unrelated top-level key
        pub fn expiring_in(minutes: i64) -> Self {
            let expires_at = (Utc::now() + Duration::minutes(minutes)).timestamp_millis();
            Self::with_document(json!({
                "claudeAiOauth": {
                    "accessToken": "old-access",
                    "refreshToken": "old-refresh",
                    "expiresAt": expires_at,
                    "scopes": ["user:inference", "user:profile"],
                    "subscriptionType": "max",
                    "rateLimitTier": "default_claude_max_20x"
                },
                "mcpOAuth": { "server": { "token": "keep-me" } }
            }))
        }

        pub fn with_document(document: Value) -> Self {
            let temp_dir = TempDir::new().expect("Failed to create temp dir");
            let path = temp_dir.path().join(".credentials.json");
            std::fs::write(&path, serde_json::to_vec_pretty(&document).unwrap()).unwrap();
            Self {
                _temp_dir: temp_dir,
                path,
            }
        }

        pub fn empty() -> Self {
            let temp_dir = TempDir::new().expect("Failed to create temp dir");
            let path = temp_dir.path().join(".credentials.json");
            Self {
                _temp_dir: temp_dir,
                path,
            }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        pub fn read(&self) -> Value {
            serde_json::from_slice(&std::fs::read(&self.path).unwrap()).unwrap()
        }

        pub fn write(&self, document: &Value) {
            std::fs::write(&self.path, serde_json::to_vec_pretty(document).unwrap()).unwrap();
        }

        /// `claudeAiOauth.expiresAt` as stored
        pub fn expires_at(&self) -> i64 {
            self.read()["claudeAiOauth"]["expiresAt"].as_i64().unwrap()
        }
    }
}

/// Async test helpers
pub mod async_helpers {
    use std::time::Duration;

    /// Default test timeout (5 seconds)
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Poll `condition` every 20ms until it holds or `timeout` elapses
    pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
