//! TokenRefreshEngine against a credential file on disk

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::fixtures::CredentialFile;
use tests::RecordingSink;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hassbridge_auth::{OAuthConfig, OAuthConfigResolver, TokenRefreshEngine};
use hassbridge_core::{DomainEvent, EventBus, NotificationSource};
use hassbridge_storage::JsonCredentialStore;

const TOKEN_PATH: &str = "/v1/oauth/token";

fn engine(server: &MockServer, file: &CredentialFile, sink: Arc<RecordingSink>) -> TokenRefreshEngine {
    let resolver = Arc::new(OAuthConfigResolver::fixed(OAuthConfig::new(
        format!("{}{}", server.uri(), TOKEN_PATH),
        "test-client-id",
    )));
    TokenRefreshEngine::builder(Arc::new(JsonCredentialStore::new(file.path())), resolver)
        .with_notifier(sink)
        .with_relogin_hint("CLAUDE_CONFIG_DIR=/data/claude claude login")
        .build()
}

fn invalid_grant() -> ResponseTemplate {
    ResponseTemplate::new(400).set_body_json(json!({
        "error": "invalid_grant",
        "error_description": "Refresh token not found or invalid"
    }))
}

// =============================================================================
// Successful refresh
// =============================================================================

#[tokio::test]
async fn test_expiring_token_is_refreshed_and_extras_survive() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_partial_json(json!({
            "grant_type": "refresh_token",
            "refresh_token": "old-refresh",
            "client_id": "test-client-id"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-access",
            "refresh_token": "new-refresh",
            "expires_in": 28800,
            "token_type": "Bearer",
            "scope": "user:inference user:profile",
            "account": { "uuid": "nested objects are not merged" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let file = CredentialFile::expiring_in(5);
    let sink = Arc::new(RecordingSink::new());
    let engine = engine(&server, &file, sink.clone());

    let before = Utc::now().timestamp_millis();
    let outcome = engine.ensure_valid_token().await;

    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.message, "Token refreshed successfully. Valid for 480 minutes");

    let document = file.read();
    let record = &document["claudeAiOauth"];
    assert_eq!(record["accessToken"], "new-access");
    assert_eq!(record["refreshToken"], "new-refresh");
    assert_eq!(record["rateLimitTier"], "default_claude_max_20x");
    assert_eq!(record["subscriptionType"], "max");
    assert_eq!(record["tokenType"], "Bearer");
    assert_eq!(record["scope"], "user:inference user:profile");
    assert!(record.get("account").is_none());
    assert_eq!(document["mcpOAuth"]["server"]["token"], "keep-me");

    let expires_at = file.expires_at();
    let expected = before + 28_800_000;
    assert!((expires_at - expected).abs() < 60_000, "expiresAt {} vs {}", expires_at, expected);
    assert_eq!(sink.count(), 0);
}

#[tokio::test]
async fn test_iso_expiry_is_rewritten_as_millis() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-access",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;

    let file = CredentialFile::with_document(json!({
        "claudeAiOauth": {
            "accessToken": "old-access",
            "refreshToken": "old-refresh",
            "expiresAt": "2020-01-01T00:00:00Z"
        }
    }));
    let engine = engine(&server, &file, Arc::new(RecordingSink::new()));

    assert!(engine.refresh_token().await.success);
    assert!(file.read()["claudeAiOauth"]["expiresAt"].is_i64());
    // a response without refresh_token keeps the stored one
    assert_eq!(file.read()["claudeAiOauth"]["refreshToken"], "old-refresh");
}

#[tokio::test]
async fn test_concurrent_callers_share_one_network_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "a", "refresh_token": "r", "expires_in": 28800 }))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let file = CredentialFile::expiring_in(1);
    let engine = engine(&server, &file, Arc::new(RecordingSink::new()));

    let outcomes = futures::future::join_all((0..8).map(|i| {
        let engine = engine.clone();
        async move {
            if i % 2 == 0 {
                engine.refresh_token().await
            } else {
                engine.ensure_valid_token().await
            }
        }
    }))
    .await;

    assert!(outcomes.iter().all(|o| o.success));
    assert!(outcomes.windows(2).all(|w| w[0] == w[1]));

    // the slot is clear again: the token is now fresh, so no further POST
    let later = engine.refresh_token().await;
    assert!(later.message.starts_with("Token still valid for"));
}

// =============================================================================
// invalid_grant handling
// =============================================================================

#[tokio::test]
async fn test_invalid_grant_with_concurrent_file_update_is_success() {
    let server = MockServer::start().await;
    let file = CredentialFile::expiring_in(5);

    // Another process writes a fresh token while our request is in flight.
    let updated = json!({
        "claudeAiOauth": {
            "accessToken": "other-process-access",
            "refreshToken": "other-process-refresh",
            "expiresAt": (Utc::now() + chrono::Duration::hours(8)).timestamp_millis(),
            "rateLimitTier": "default_claude_max_20x"
        }
    });
    let file_path = file.path().to_path_buf();
    Mock::given(method("POST"))
        .respond_with(move |_: &wiremock::Request| {
            std::fs::write(&file_path, serde_json::to_vec(&updated).unwrap()).unwrap();
            invalid_grant()
        })
        .expect(1)
        .mount(&server)
        .await;

    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let sink = Arc::new(RecordingSink::new());
    let resolver = Arc::new(OAuthConfigResolver::fixed(OAuthConfig::new(
        format!("{}{}", server.uri(), TOKEN_PATH),
        "test-client-id",
    )));
    let engine = TokenRefreshEngine::builder(Arc::new(JsonCredentialStore::new(file.path())), resolver)
        .with_notifier(sink.clone())
        .with_events(bus.sender())
        .build();

    let outcome = engine.refresh_token().await;
    assert!(outcome.success, "{}", outcome.message);
    assert!(!outcome.needs_relogin);
    assert!(outcome.message.starts_with("Token refreshed by another process"));
    assert_eq!(sink.count(), 0);
    assert_eq!(file.read()["claudeAiOauth"]["accessToken"], "other-process-access");

    let events = rx.drain();
    assert!(events.contains(&DomainEvent::TokenRefreshed {
        expires_at: file.expires_at(),
        concurrent: true,
    }));
}

#[tokio::test]
async fn test_invalid_grant_without_update_needs_relogin_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(invalid_grant())
        .expect(2)
        .mount(&server)
        .await;

    let file = CredentialFile::expiring_in(5);
    let sink = Arc::new(RecordingSink::new());
    let engine = engine(&server, &file, sink.clone());

    let first = engine.refresh_token().await;
    assert!(!first.success);
    assert!(first.needs_relogin);
    assert_eq!(first.message, "Refresh token expired. Manual re-login required.");

    let second = engine.refresh_token().await;
    assert!(second.needs_relogin);

    let messages = sink.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].source, NotificationSource::Manual);
    assert!(messages[0].text.contains("CLAUDE_CONFIG_DIR=/data/claude claude login"));

    // invalid_grant is not a generic failure
    assert_eq!(engine.consecutive_failures(), 0);
    // the file is untouched
    assert_eq!(file.read()["claudeAiOauth"]["accessToken"], "old-access");
}

// =============================================================================
// Generic failures
// =============================================================================

#[tokio::test]
async fn test_server_errors_alert_after_three_consecutive_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let file = CredentialFile::expiring_in(5);
    let sink = Arc::new(RecordingSink::new());
    let engine = engine(&server, &file, sink.clone());

    for attempt in 1..=4 {
        let outcome = engine.refresh_token().await;
        assert!(!outcome.success);
        assert!(!outcome.needs_relogin);
        assert!(outcome.message.starts_with("Refresh failed:"));
        assert_eq!(engine.consecutive_failures(), attempt);
    }

    let texts = sink.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("3 consecutive refresh attempts failed"));
}

#[tokio::test]
async fn test_missing_credentials_need_login_without_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let file = CredentialFile::empty();
    let engine = engine(&server, &file, Arc::new(RecordingSink::new()));

    let outcome = engine.ensure_valid_token().await;
    assert!(outcome.needs_relogin);
    assert_eq!(
        outcome.message,
        "No OAuth credentials found. Please login with: claude login"
    );

    let status = engine.status().await;
    assert!(!status.has_credentials);
}

#[tokio::test]
async fn test_status_reports_remaining_minutes() {
    let server = MockServer::start().await;
    let file = CredentialFile::expiring_in(90);
    let engine = engine(&server, &file, Arc::new(RecordingSink::new()));

    let status = engine.status().await;
    assert!(status.has_credentials);
    assert!(!status.is_expired);
    assert!(!status.is_expiring_soon);
    assert!((89..=90).contains(&status.remaining_minutes));
}
