//! Scripted collaborators for pipeline and refresh tests
//!
//! Each mock records what it was asked to do so tests can assert on calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use hassbridge_core::{
    ChannelType, NotificationMessage, NotificationResult, NotificationSink, RefreshOutcome,
    TokenProvider,
};
use hassbridge_pipeline::{ExecutionError, PromptExecutor};

// ============================================================================
// RecordingSink
// ============================================================================

/// Notification sink that keeps every message
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<NotificationMessage>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<NotificationMessage> {
        self.messages.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages.lock().iter().map(|m| m.text.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.messages.lock().len()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, message: NotificationMessage) -> Vec<NotificationResult> {
        self.messages.lock().push(message);
        vec![NotificationResult::delivered(ChannelType::Slack)]
    }
}

// ============================================================================
// ScriptedExecutor
// ============================================================================

/// Prompt executor replaying queued replies; answers `default` once the
/// script runs out
pub struct ScriptedExecutor {
    replies: Mutex<VecDeque<Result<String, ExecutionError>>>,
    default: String,
    delay: Duration,
    prompts: Mutex<Vec<String>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default: default.into(),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_reply(self, reply: Result<String, ExecutionError>) -> Self {
        self.replies.lock().push_back(reply);
        self
    }

    /// Time each execution takes
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    /// Highest number of executions observed running at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Failure the CLI reports when its OAuth token has expired
    pub fn expired_token() -> ExecutionError {
        ExecutionError::NonZeroExit {
            code: Some(1),
            stdout: String::new(),
            stderr: "API Error: 401 {\"type\":\"authentication_error\",\"message\":\"OAuth token has expired.\"}".into(),
        }
    }
}

#[async_trait]
impl PromptExecutor for ScriptedExecutor {
    async fn execute(&self, prompt: &str) -> Result<String, ExecutionError> {
        self.prompts.lock().push(prompt.to_string());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(self.default.clone()))
    }
}

// ============================================================================
// ScriptedTokenProvider
// ============================================================================

/// Token provider with fixed outcomes that counts calls
pub struct ScriptedTokenProvider {
    ensure: Mutex<RefreshOutcome>,
    refresh: Mutex<RefreshOutcome>,
    ensure_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl ScriptedTokenProvider {
    pub fn valid() -> Self {
        Self::new(
            RefreshOutcome::ok("Token still valid for 120 minutes", 0),
            RefreshOutcome::ok("Token refreshed successfully. Valid for 480 minutes", 0),
        )
    }

    pub fn needs_relogin() -> Self {
        let outcome = RefreshOutcome::relogin("Refresh token expired. Manual re-login required.");
        Self::new(outcome.clone(), outcome)
    }

    pub fn new(ensure: RefreshOutcome, refresh: RefreshOutcome) -> Self {
        Self {
            ensure: Mutex::new(ensure),
            refresh: Mutex::new(refresh),
            ensure_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_refresh_outcome(&self, outcome: RefreshOutcome) {
        *self.refresh.lock() = outcome;
    }

    pub fn ensure_calls(&self) -> usize {
        self.ensure_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for ScriptedTokenProvider {
    async fn ensure_valid_token(&self) -> RefreshOutcome {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure.lock().clone()
    }

    async fn refresh_token(&self) -> RefreshOutcome {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh.lock().clone()
    }
}
