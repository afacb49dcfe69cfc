//! PKCE authorization-code login

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use tests::fixtures::CredentialFile;
use url::Url;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hassbridge_auth::flow::REDIRECT_URI;
use hassbridge_auth::{FlowError, OAuthConfig, OAuthConfigResolver, OAuthFlow, PkcePair, TokenEndpointClient};
use hassbridge_core::CredentialRepository;
use hassbridge_storage::JsonCredentialStore;

fn flow(server: &MockServer) -> OAuthFlow {
    let resolver = Arc::new(OAuthConfigResolver::fixed(OAuthConfig::new(
        format!("{}/v1/oauth/token", server.uri()),
        "test-client-id",
    )));
    OAuthFlow::new(resolver, TokenEndpointClient::new())
}

fn query(url: &str, key: &str) -> String {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_login_round_trip_saves_into_existing_file() {
    let server = MockServer::start().await;
    let flow = flow(&server);
    let request = flow.start().await.unwrap();
    let challenge = query(&request.auth_url, "code_challenge");

    // The verifier is only known to the flow; check it through the challenge.
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "grant_type": "authorization_code",
            "code": "auth-code",
            "redirect_uri": REDIRECT_URI,
            "client_id": "test-client-id",
            "state": request.state,
        })))
        .respond_with(move |req: &wiremock::Request| {
            let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
            let verifier = body["code_verifier"].as_str().unwrap_or_default();
            if PkcePair::challenge_for(verifier) != challenge {
                return ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" }));
            }
            ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "login-access",
                "refresh_token": "login-refresh",
                "expires_in": 28800,
                "token_type": "Bearer"
            }))
        })
        .expect(1)
        .mount(&server)
        .await;

    let file = CredentialFile::expiring_in(-60);
    let store = JsonCredentialStore::new(file.path());

    let pasted = format!("auth-code#{}", request.state);
    let record = flow.complete(&pasted, "", &store).await.unwrap();
    assert_eq!(record.access_token, "login-access");

    let saved = store.load().await.unwrap().unwrap();
    assert_eq!(saved.refresh_token.as_deref(), Some("login-refresh"));
    assert_eq!(saved.extra.get("rateLimitTier"), Some(&json!("default_claude_max_20x")));
    assert_eq!(file.read()["mcpOAuth"]["server"]["token"], "keep-me");
    assert_eq!(flow.active_sessions(), 0);
}

#[tokio::test]
async fn test_session_is_single_use() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "code already used"
        })))
        .mount(&server)
        .await;

    let flow = flow(&server);
    let request = flow.start().await.unwrap();

    let first = flow.exchange("code", &request.state).await.unwrap_err();
    assert!(matches!(first, FlowError::Exchange(ref e) if e.is_invalid_grant()));

    let second = flow.exchange("code", &request.state).await.unwrap_err();
    assert!(matches!(second, FlowError::UnknownSession));
}
