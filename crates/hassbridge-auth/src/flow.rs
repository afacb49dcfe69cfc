//! Authorization-code login with PKCE
//!
//! [`OAuthFlow::start`] creates an in-memory session keyed by its `state`
//! and returns the URL to open in a browser. The user pastes the resulting
//! code back, and [`OAuthFlow::exchange`] consumes the session and trades
//! the code for tokens. Sessions are never persisted and are dropped after
//! [`SESSION_TTL`] whether or not they were used.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use hassbridge_core::{CredentialRecord, CredentialRepository, TokenResponse};

use crate::client::{TokenEndpointClient, TokenRequestError};
use crate::config::OAuthConfigResolver;
use crate::pkce::{random_state, PkcePair};

pub const AUTHORIZE_URL: &str = "https://claude.ai/oauth/authorize";
pub const REDIRECT_URI: &str = "https://platform.claude.com/oauth/code/callback";
pub const SCOPES: &str =
    "org:create_api_key user:profile user:inference user:sessions:claude_code user:mcp_servers";
pub const SESSION_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Invalid or expired session. Please start the login flow again.")]
    UnknownSession,

    #[error("Session expired. Please start the login flow again.")]
    SessionExpired,

    #[error("Token exchange failed: {0}")]
    Exchange(#[from] TokenRequestError),

    #[error("Failed to save credentials: {0}")]
    Save(anyhow::Error),

    #[error("Invalid authorization URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[derive(Clone)]
pub struct PkceSession {
    pub code_verifier: String,
    pub code_challenge: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    started: Instant,
}

impl PkceSession {
    fn new() -> Self {
        let pkce = PkcePair::generate();
        Self {
            code_verifier: pkce.verifier,
            code_challenge: pkce.challenge,
            state: random_state(),
            created_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.started.elapsed() >= ttl
    }
}

impl std::fmt::Debug for PkceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceSession")
            .field("code_verifier", &"[REDACTED]")
            .field("code_challenge", &self.code_challenge)
            .field("state", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// URL to open in the browser plus the `state` the caller must hand back
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub auth_url: String,
    pub state: String,
}

pub struct OAuthFlow {
    resolver: Arc<OAuthConfigResolver>,
    endpoint: TokenEndpointClient,
    sessions: DashMap<String, PkceSession>,
    ttl: Duration,
    authorize_url: String,
    redirect_uri: String,
}

impl OAuthFlow {
    pub fn new(resolver: Arc<OAuthConfigResolver>, endpoint: TokenEndpointClient) -> Self {
        Self {
            resolver,
            endpoint,
            sessions: DashMap::new(),
            ttl: SESSION_TTL,
            authorize_url: AUTHORIZE_URL.to_string(),
            redirect_uri: REDIRECT_URI.to_string(),
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_authorize_url(mut self, url: impl Into<String>) -> Self {
        self.authorize_url = url.into();
        self
    }

    /// Begin a login: new session, authorization URL
    pub async fn start(&self) -> Result<AuthorizationRequest, FlowError> {
        self.purge_expired();

        let config = self.resolver.resolve().await;
        let session = PkceSession::new();

        let mut url = Url::parse(&self.authorize_url)?;
        url.query_pairs_mut()
            .append_pair("code", "true")
            .append_pair("client_id", &config.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", SCOPES)
            .append_pair("code_challenge", &session.code_challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", &session.state);

        let state = session.state.clone();
        self.sessions.insert(state.clone(), session);

        info!(active_sessions = self.sessions.len(), "[OAuth] Login flow started");
        Ok(AuthorizationRequest {
            auth_url: url.to_string(),
            state,
        })
    }

    /// Trade an authorization code for tokens, consuming the session.
    ///
    /// The callback page shows `code#state`; a pasted value of that shape is
    /// split and its state is used when `state` is empty.
    pub async fn exchange(&self, code: &str, state: &str) -> Result<TokenResponse, FlowError> {
        let (code, state) = split_pasted_code(code.trim(), state.trim());

        let removed = self.sessions.remove(state);
        self.purge_expired();
        let (_, session) = removed.ok_or(FlowError::UnknownSession)?;
        if session.is_expired(self.ttl) {
            debug!("[OAuth] Discarded expired login session");
            return Err(FlowError::SessionExpired);
        }

        let config = self.resolver.resolve().await;
        let tokens = self
            .endpoint
            .exchange_code(
                &config,
                code,
                &session.code_verifier,
                &self.redirect_uri,
                Some(state),
            )
            .await
            .map_err(|e| {
                warn!(error = %e, "[OAuth] Code exchange failed");
                e
            })?;

        info!(expires_in = tokens.expires_in, "[OAuth] Code exchange successful");
        Ok(tokens)
    }

    /// [`exchange`](Self::exchange) and persist the tokens into `store`
    pub async fn complete(
        &self,
        code: &str,
        state: &str,
        store: &dyn CredentialRepository,
    ) -> Result<CredentialRecord, FlowError> {
        let tokens = self.exchange(code, state).await?;
        let now = Utc::now();

        let record = match store.load().await {
            Ok(Some(mut existing)) => {
                existing.apply_token_response(&tokens, now);
                existing
            }
            Ok(None) => CredentialRecord::from_token_response(&tokens, now),
            Err(e) => {
                warn!(error = %e, "[OAuth] Existing credentials unreadable, tokens not saved");
                return Err(FlowError::Save(e));
            }
        };

        store.save(&record).await.map_err(FlowError::Save)?;
        info!("[OAuth] Credentials saved");
        Ok(record)
    }

    /// Drop sessions older than the TTL, returning how many were removed.
    ///
    /// Runs on every `start`, `exchange` and `active_sessions` call, so an
    /// abandoned session lives at most until the flow is next used.
    pub fn purge_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired(self.ttl));
        let purged = before - self.sessions.len();
        if purged > 0 {
            debug!(purged, "[OAuth] Purged expired login sessions");
        }
        purged
    }

    /// Sessions still within their TTL
    pub fn active_sessions(&self) -> usize {
        self.purge_expired();
        self.sessions.len()
    }
}

fn split_pasted_code<'a>(code: &'a str, state: &'a str) -> (&'a str, &'a str) {
    match code.split_once('#') {
        Some((code, embedded)) if state.is_empty() => (code, embedded),
        Some((code, _)) => (code, state),
        None => (code, state),
    }
}
