//! Token Refresh Engine - keeps the stored OAuth access token usable
//!
//! - `ensure_valid_token()` is called before work that needs the token; it
//!   only touches the network when the token is expired or about to expire.
//! - `refresh_token()` is single-flight: while one refresh runs, every other
//!   caller in this process awaits the same task and gets the same outcome.
//! - The credential file may be shared with other processes. When the
//!   provider answers `invalid_grant`, the file is re-read once; a newer,
//!   still-fresh `expiresAt` means someone else refreshed first.
//! - `start()` runs a periodic status check that refreshes ahead of expiry.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use hassbridge_core::{
    CredentialRecord, CredentialRepository, DomainEvent, EventSender, NotificationMessage,
    NotificationSink, NotificationSource, RefreshOutcome, TokenProvider, TokenResponse,
    TokenStatus,
};

use crate::client::{TokenEndpointClient, TokenRequestError};
use crate::config::OAuthConfigResolver;

const NO_CREDENTIALS: &str = "No OAuth credentials found. Please login with: claude login";
const RELOGIN_REQUIRED: &str = "Refresh token expired. Manual re-login required.";
const DEFAULT_RELOGIN_COMMAND: &str = "claude login";

/// Timing and alerting knobs
#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    /// Refresh once the token expires within this window
    pub refresh_before_expiry: Duration,
    /// Period of the background status check
    pub check_interval: Duration,
    /// Consecutive generic failures that trigger one alert
    pub failure_alert_threshold: u32,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            refresh_before_expiry: Duration::from_secs(30 * 60),
            check_interval: Duration::from_secs(5 * 60),
            failure_alert_threshold: 3,
        }
    }
}

impl RefreshPolicy {
    fn threshold(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.refresh_before_expiry)
            .unwrap_or_else(|_| chrono::Duration::zero())
    }
}

type RefreshFlight = Shared<BoxFuture<'static, RefreshOutcome>>;

struct EngineInner {
    store: Arc<dyn CredentialRepository>,
    resolver: Arc<OAuthConfigResolver>,
    endpoint: TokenEndpointClient,
    notifier: Option<Arc<dyn NotificationSink>>,
    events: EventSender,
    policy: RefreshPolicy,
    relogin_command: String,
    failures: AtomicU32,
    relogin_notified: AtomicBool,
    in_flight: Mutex<Option<RefreshFlight>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap to clone; clones share state
#[derive(Clone)]
pub struct TokenRefreshEngine {
    inner: Arc<EngineInner>,
}

pub struct TokenRefreshEngineBuilder {
    store: Arc<dyn CredentialRepository>,
    resolver: Arc<OAuthConfigResolver>,
    endpoint: Option<TokenEndpointClient>,
    notifier: Option<Arc<dyn NotificationSink>>,
    events: EventSender,
    policy: RefreshPolicy,
    relogin_command: String,
}

impl TokenRefreshEngineBuilder {
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Command shown in the re-login notification
    pub fn with_relogin_hint(mut self, command: impl Into<String>) -> Self {
        self.relogin_command = command.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: TokenEndpointClient) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn build(self) -> TokenRefreshEngine {
        TokenRefreshEngine {
            inner: Arc::new(EngineInner {
                store: self.store,
                resolver: self.resolver,
                endpoint: self.endpoint.unwrap_or_default(),
                notifier: self.notifier,
                events: self.events,
                policy: self.policy,
                relogin_command: self.relogin_command,
                failures: AtomicU32::new(0),
                relogin_notified: AtomicBool::new(false),
                in_flight: Mutex::new(None),
                poller: Mutex::new(None),
            }),
        }
    }
}

impl TokenRefreshEngine {
    pub fn builder(
        store: Arc<dyn CredentialRepository>,
        resolver: Arc<OAuthConfigResolver>,
    ) -> TokenRefreshEngineBuilder {
        TokenRefreshEngineBuilder {
            store,
            resolver,
            endpoint: None,
            notifier: None,
            events: EventSender::detached(),
            policy: RefreshPolicy::default(),
            relogin_command: DEFAULT_RELOGIN_COMMAND.to_string(),
        }
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.inner.policy
    }

    /// Consecutive generic refresh failures since the last success
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.failures.load(Ordering::SeqCst)
    }

    /// Refresh if the stored token is expired or expiring soon.
    ///
    /// A missing record or refresh token is reported as needing re-login
    /// without any network call.
    pub async fn ensure_valid_token(&self) -> RefreshOutcome {
        let record = match self.inner.store.load().await {
            Ok(Some(record)) => record,
            Ok(None) => return RefreshOutcome::relogin(NO_CREDENTIALS),
            Err(e) => {
                warn!(error = %e, "[TokenRefresh] Cannot read credentials");
                return RefreshOutcome::failed(format!("Cannot read credentials: {:#}", e));
            }
        };
        if !record.has_refresh_token() {
            return RefreshOutcome::relogin(NO_CREDENTIALS);
        }

        let now = Utc::now();
        if record.expires_within(self.inner.policy.threshold(), now) {
            return self.refresh_token().await;
        }
        RefreshOutcome::ok(
            format!("Token still valid for {} minutes", record.remaining_minutes(now)),
            record.expires_at,
        )
    }

    /// Single-flight refresh.
    ///
    /// Joins the refresh already in flight, or starts one. The refresh runs
    /// on its own task, so it finishes even if every caller goes away; the
    /// slot is cleared when it completes so the next call starts fresh.
    pub async fn refresh_token(&self) -> RefreshOutcome {
        let flight = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(flight) => {
                    debug!("[TokenRefresh] Joining refresh already in flight");
                    flight.clone()
                }
                None => {
                    let flight = self.spawn_flight();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    fn spawn_flight(&self) -> RefreshFlight {
        let worker = self.inner.clone();
        let task = tokio::spawn(async move { worker.run_refresh().await });

        let owner = self.inner.clone();
        async move {
            let outcome = task.await.unwrap_or_else(|e| {
                error!(error = %e, "[TokenRefresh] Refresh task aborted");
                RefreshOutcome::failed(format!("Refresh failed: {}", e))
            });
            owner.in_flight.lock().take();
            outcome
        }
        .boxed()
        .shared()
    }

    /// Snapshot of the stored token
    pub async fn status(&self) -> TokenStatus {
        match self.inner.store.load().await {
            Ok(Some(record)) => {
                let now = Utc::now();
                TokenStatus {
                    has_credentials: true,
                    expires_at: record.expires_at_utc(),
                    is_expired: record.is_expired(now),
                    is_expiring_soon: record.expires_within(self.inner.policy.threshold(), now),
                    remaining_minutes: record.remaining_minutes(now),
                }
            }
            Ok(None) => TokenStatus::default(),
            Err(e) => {
                warn!(error = %e, "[TokenRefresh] Cannot read credentials for status");
                TokenStatus::default()
            }
        }
    }

    /// One tick of the periodic check
    pub async fn check_now(&self) {
        let status = self.status().await;
        if !status.has_credentials {
            info!("[TokenRefresh] No credentials found, skipping check");
            return;
        }

        info!(
            remaining_minutes = status.remaining_minutes,
            expired = status.is_expired,
            expiring_soon = status.is_expiring_soon,
            "[TokenRefresh] Token status"
        );

        if status.needs_refresh() {
            let outcome = self.refresh_token().await;
            info!(
                success = outcome.success,
                "[TokenRefresh] Refresh result: {}", outcome.message
            );
        }
    }

    /// Start the periodic check; the first check runs immediately.
    /// No-op when already running.
    pub fn start(&self) {
        let mut poller = self.inner.poller.lock();
        if poller.as_ref().is_some_and(|h| !h.is_finished()) {
            info!("[TokenRefresh] Service already running");
            return;
        }

        let policy = &self.inner.policy;
        info!(
            check_interval_secs = policy.check_interval.as_secs(),
            refresh_before_expiry_mins = policy.refresh_before_expiry.as_secs() / 60,
            "[TokenRefresh] Starting token refresh service"
        );

        let engine = self.clone();
        let period = policy.check_interval;
        *poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.check_now().await;
            }
        }));
    }

    /// Stop the periodic check. A refresh already in flight still completes.
    pub fn stop(&self) {
        if let Some(handle) = self.inner.poller.lock().take() {
            handle.abort();
            info!("[TokenRefresh] Service stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .poller
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl EngineInner {
    async fn run_refresh(&self) -> RefreshOutcome {
        let record = match self.store.load().await {
            Ok(Some(record)) => record,
            Ok(None) => return RefreshOutcome::relogin(NO_CREDENTIALS),
            Err(e) => return self.on_failure(format!("cannot read credentials: {:#}", e)).await,
        };
        let Some(refresh_token) = record.refresh_token.clone().filter(|t| !t.is_empty()) else {
            return RefreshOutcome::relogin(NO_CREDENTIALS);
        };

        let now = Utc::now();
        if !record.expires_within(self.policy.threshold(), now) {
            return RefreshOutcome::ok(
                format!(
                    "Token still valid for {} minutes",
                    record.remaining_minutes(now)
                ),
                record.expires_at,
            );
        }

        info!(
            remaining_minutes = record.remaining_minutes(now),
            "[TokenRefresh] Token expiring soon, refreshing"
        );
        let config = self.resolver.resolve().await;
        match self.endpoint.refresh(&config, &refresh_token).await {
            Ok(response) => self.on_refreshed(record, response).await,
            Err(e @ TokenRequestError::InvalidGrant { .. }) => {
                self.on_invalid_grant(record.expires_at, &e).await
            }
            Err(e) => self.on_failure(e.to_string()).await,
        }
    }

    async fn on_refreshed(
        &self,
        mut record: CredentialRecord,
        response: TokenResponse,
    ) -> RefreshOutcome {
        record.apply_token_response(&response, Utc::now());
        if let Err(e) = self.store.save(&record).await {
            return self
                .on_failure(format!("cannot save credentials: {:#}", e))
                .await;
        }

        self.failures.store(0, Ordering::SeqCst);
        self.relogin_notified.store(false, Ordering::SeqCst);

        let minutes = (response.expires_in as f64 / 60.0).round() as i64;
        info!(expires_in_minutes = minutes, "[TokenRefresh] Token refreshed");
        self.events.emit(DomainEvent::TokenRefreshed {
            expires_at: record.expires_at,
            concurrent: false,
        });
        RefreshOutcome::ok(
            format!("Token refreshed successfully. Valid for {} minutes", minutes),
            record.expires_at,
        )
    }

    /// The refresh token was rejected. Before asking for a manual login,
    /// check whether another process already replaced it.
    async fn on_invalid_grant(
        &self,
        previous_expires_at: i64,
        err: &TokenRequestError,
    ) -> RefreshOutcome {
        warn!(error = %err, "[TokenRefresh] Refresh token rejected, re-reading credentials");

        match self.store.load().await {
            Ok(Some(current)) => {
                let now = Utc::now();
                if current.expires_at > previous_expires_at
                    && !current.expires_within(self.policy.threshold(), now)
                {
                    let minutes = current.remaining_minutes(now);
                    info!(
                        expires_in_minutes = minutes,
                        "[TokenRefresh] Token was refreshed by another process"
                    );
                    self.failures.store(0, Ordering::SeqCst);
                    self.relogin_notified.store(false, Ordering::SeqCst);
                    self.events.emit(DomainEvent::TokenRefreshed {
                        expires_at: current.expires_at,
                        concurrent: true,
                    });
                    return RefreshOutcome::ok(
                        format!(
                            "Token refreshed by another process. Valid for {} minutes",
                            minutes
                        ),
                        current.expires_at,
                    );
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "[TokenRefresh] Re-read after invalid_grant failed"),
        }

        error!("[TokenRefresh] Refresh token expired, manual re-login required");
        self.events.emit(DomainEvent::ReloginRequired {
            message: RELOGIN_REQUIRED.to_string(),
        });
        if !self.relogin_notified.swap(true, Ordering::SeqCst) {
            let text = format!(
                "⚠️ *Claude token expired*\n\
                 The refresh token is no longer valid and a manual login is required.\n\
                 Run:\n```\n{}\n```",
                self.relogin_command
            );
            self.notify(text).await;
        }
        RefreshOutcome::relogin(RELOGIN_REQUIRED)
    }

    async fn on_failure(&self, error: String) -> RefreshOutcome {
        let count = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        error!(
            consecutive_failures = count,
            "[TokenRefresh] Refresh failed: {}", error
        );

        if count == self.policy.failure_alert_threshold {
            let text = format!(
                "⚠️ *Claude token refresh failed*\n\
                 {} consecutive refresh attempts failed.\n\
                 Error: {}",
                count, error
            );
            self.notify(text).await;
        }
        RefreshOutcome::failed(format!("Refresh failed: {}", error))
    }

    async fn notify(&self, text: String) {
        let Some(notifier) = &self.notifier else {
            debug!("[TokenRefresh] No notifier configured, alert only logged");
            return;
        };
        let results = notifier
            .notify(NotificationMessage::markdown(text, NotificationSource::Manual))
            .await;
        for failed in results.iter().filter(|r| !r.success) {
            warn!(
                channel = %failed.channel,
                error = failed.error.as_deref().unwrap_or("unknown"),
                "[TokenRefresh] Alert delivery failed"
            );
        }
    }
}

#[async_trait]
impl TokenProvider for TokenRefreshEngine {
    async fn ensure_valid_token(&self) -> RefreshOutcome {
        TokenRefreshEngine::ensure_valid_token(self).await
    }

    async fn refresh_token(&self) -> RefreshOutcome {
        TokenRefreshEngine::refresh_token(self).await
    }
}
