//! Token endpoint client
//!
//! Both grant types post a JSON body to the resolved token URL. Failures are
//! classified so the refresh engine can tell a rejected refresh token
//! (`invalid_grant`) apart from everything else.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use hassbridge_core::{TokenErrorBody, TokenResponse};

use crate::config::OAuthConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// Provider rejected the grant (refresh token revoked/expired or code reused)
    #[error("invalid_grant (HTTP {status}): {description}")]
    InvalidGrant { status: u16, description: String },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

impl TokenRequestError {
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, Self::InvalidGrant { .. })
    }
}

#[derive(Clone)]
pub struct TokenEndpointClient {
    http: reqwest::Client,
}

impl TokenEndpointClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "[OAuth] Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self { http }
    }

    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Exchange a refresh token for a new access token
    pub async fn refresh(
        &self,
        config: &OAuthConfig,
        refresh_token: &str,
    ) -> Result<TokenResponse, TokenRequestError> {
        debug!(token_url = %config.token_url, "[OAuth] Refreshing access token");
        let body = json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
            "client_id": config.client_id,
        });
        self.post(&config.token_url, &body).await
    }

    /// Exchange an authorization code (PKCE) for tokens
    pub async fn exchange_code(
        &self,
        config: &OAuthConfig,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
        state: Option<&str>,
    ) -> Result<TokenResponse, TokenRequestError> {
        info!(token_url = %config.token_url, "[OAuth] Exchanging authorization code");
        let mut body = json!({
            "grant_type": "authorization_code",
            "code": code,
            "redirect_uri": redirect_uri,
            "client_id": config.client_id,
            "code_verifier": code_verifier,
        });
        if let Some(state) = state {
            body["state"] = json!(state);
        }
        self.post(&config.token_url, &body).await
    }

    async fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<TokenResponse, TokenRequestError> {
        let response = self.http.post(url).json(body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, text));
        }

        let text = response.text().await?;
        serde_json::from_str::<TokenResponse>(&text)
            .map_err(|e| TokenRequestError::InvalidResponse(e.to_string()))
    }
}

impl Default for TokenEndpointClient {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_failure(status: StatusCode, body: String) -> TokenRequestError {
    if status.is_client_error() {
        if let Ok(parsed) = serde_json::from_str::<TokenErrorBody>(&body) {
            if parsed.error.as_deref() == Some("invalid_grant") {
                return TokenRequestError::InvalidGrant {
                    status: status.as_u16(),
                    description: parsed.error_description.unwrap_or_default(),
                };
            }
        }
    }
    TokenRequestError::Http {
        status: status.as_u16(),
        body,
    }
}
