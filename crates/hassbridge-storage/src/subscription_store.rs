//! Subscription rule registry
//!
//! Rules are kept in memory and mirrored to a JSON array on disk. Every
//! mutation rewrites the whole file. External edits are picked up by
//! [`SubscriptionRegistry::start_watching`], which reloads 500ms after the
//! last change; a reload that reads an empty or half-written file keeps the
//! current rules.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hassbridge_core::{
    DomainEvent, EventSender, EventSubscription, NewSubscription, RepoResult, RuleSource,
    SubscriptionPatch,
};

use crate::fs_util::write_atomic;
use crate::watcher::{self, FileWatch};

/// Quiet period before an external change is reloaded
pub const RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);

type ReloadCallback = Arc<dyn Fn(&[EventSubscription]) + Send + Sync>;

/// Result of a reload attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    Reloaded { count: usize },
    /// Kept the in-memory rules; the file looked mid-write or unreadable
    Kept { reason: String },
}

struct WatchState {
    _watch: FileWatch,
    task: JoinHandle<()>,
}

struct RegistryInner {
    path: PathBuf,
    rules: RwLock<Vec<EventSubscription>>,
    /// Serializes read-modify-write cycles against the file
    write_lock: tokio::sync::Mutex<()>,
    callbacks: Mutex<Vec<ReloadCallback>>,
    watch: Mutex<Option<WatchState>>,
    events: EventSender,
}

/// File-backed, hot-reloadable set of subscription rules
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    /// Open (creating an empty file if needed) and load the rules
    pub async fn open(path: impl Into<PathBuf>) -> RepoResult<Self> {
        Self::open_with_events(path, EventSender::detached()).await
    }

    pub async fn open_with_events(
        path: impl Into<PathBuf>,
        events: EventSender,
    ) -> RepoResult<Self> {
        let registry = Self {
            inner: Arc::new(RegistryInner {
                path: path.into(),
                rules: RwLock::new(Vec::new()),
                write_lock: tokio::sync::Mutex::new(()),
                callbacks: Mutex::new(Vec::new()),
                watch: Mutex::new(None),
                events,
            }),
        };

        if tokio::fs::try_exists(registry.path()).await.unwrap_or(false) {
            if let ReloadOutcome::Kept { reason } = registry.reload().await {
                warn!(path = ?registry.path(), reason = %reason, "[Registry] Starting with no rules");
            }
        } else {
            write_atomic(registry.path(), b"[]", false)
                .await
                .with_context(|| format!("Failed to create {:?}", registry.path()))?;
            info!(path = ?registry.path(), "[Registry] Created empty rule file");
        }

        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn list(&self) -> Vec<EventSubscription> {
        self.inner.rules.read().clone()
    }

    pub fn list_enabled(&self) -> Vec<EventSubscription> {
        self.inner
            .rules
            .read()
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<EventSubscription> {
        self.inner.rules.read().iter().find(|r| r.id == id).cloned()
    }

    /// Case-insensitive substring search over rule names
    pub fn find_by_name(&self, query: &str) -> Vec<EventSubscription> {
        let query = query.to_lowercase();
        self.inner
            .rules
            .read()
            .iter()
            .filter(|r| r.name.to_lowercase().contains(&query))
            .cloned()
            .collect()
    }

    pub async fn create(&self, input: NewSubscription) -> RepoResult<EventSubscription> {
        let rule = EventSubscription::new(input);
        let created = rule.clone();
        self.mutate(move |rules| {
            rules.push(rule);
        })
        .await?;
        info!(id = %created.id, name = %created.name, event_type = %created.event_type, "[Registry] Rule created");
        Ok(created)
    }

    /// Apply `patch` to the rule; `None` if no rule has this id
    pub async fn update(
        &self,
        id: &str,
        patch: SubscriptionPatch,
    ) -> RepoResult<Option<EventSubscription>> {
        let updated = self
            .mutate(|rules| {
                rules.iter_mut().find(|r| r.id == id).map(|rule| {
                    rule.apply(patch);
                    rule.clone()
                })
            })
            .await?;
        if let Some(rule) = &updated {
            debug!(id = %rule.id, "[Registry] Rule updated");
        }
        Ok(updated)
    }

    pub async fn enable(&self, id: &str) -> RepoResult<bool> {
        self.set_enabled(id, true).await
    }

    pub async fn disable(&self, id: &str) -> RepoResult<bool> {
        self.set_enabled(id, false).await
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> RepoResult<bool> {
        let patch = SubscriptionPatch {
            enabled: Some(enabled),
            ..Default::default()
        };
        Ok(self.update(id, patch).await?.is_some())
    }

    pub async fn delete(&self, id: &str) -> RepoResult<bool> {
        let removed = self
            .mutate(|rules| {
                let before = rules.len();
                rules.retain(|r| r.id != id);
                rules.len() != before
            })
            .await?;
        if removed {
            info!(id, "[Registry] Rule deleted");
        }
        Ok(removed)
    }

    /// Run `change` on a copy of the rules, persist the result, then publish it.
    ///
    /// Nothing is persisted or published if the write fails.
    async fn mutate<T>(&self, change: impl FnOnce(&mut Vec<EventSubscription>) -> T) -> RepoResult<T> {
        let _guard = self.inner.write_lock.lock().await;

        let mut next = self.list();
        let result = change(&mut next);

        let body = serde_json::to_vec_pretty(&next)?;
        write_atomic(self.path(), &body, false).await?;

        *self.inner.rules.write() = next;
        Ok(result)
    }

    /// Re-read the file, keeping the current rules when it is empty or invalid
    pub async fn reload(&self) -> ReloadOutcome {
        let content = match tokio::fs::read_to_string(self.path()).await {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "[Registry] Rule file unreadable, keeping current rules");
                return ReloadOutcome::Kept {
                    reason: e.to_string(),
                };
            }
        };

        if content.trim().is_empty() {
            warn!("[Registry] Rule file is empty (write in progress?), keeping current rules");
            return ReloadOutcome::Kept {
                reason: "empty file".to_string(),
            };
        }

        match serde_json::from_str::<Vec<EventSubscription>>(&content) {
            Ok(rules) => {
                let count = rules.len();
                *self.inner.rules.write() = rules;
                debug!(count, "[Registry] Rules loaded");
                self.inner.events.emit(DomainEvent::RulesReloaded { count });
                ReloadOutcome::Reloaded { count }
            }
            Err(e) => {
                warn!(error = %e, "[Registry] Rule file is not valid JSON (write in progress?), keeping current rules");
                ReloadOutcome::Kept {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Register `callback` and start watching the file (once).
    ///
    /// After each debounced change the rules are reloaded and every
    /// registered callback runs with the current rules.
    pub fn start_watching<F>(&self, callback: F) -> RepoResult<()>
    where
        F: Fn(&[EventSubscription]) + Send + Sync + 'static,
    {
        self.inner.callbacks.lock().push(Arc::new(callback));

        let mut watch = self.inner.watch.lock();
        if watch.is_some() {
            return Ok(());
        }

        let (file_watch, changes) = watcher::watch_file(self.path())?;
        let task = self.spawn_reload_loop(changes, RELOAD_DEBOUNCE);
        *watch = Some(WatchState {
            _watch: file_watch,
            task,
        });
        Ok(())
    }

    /// Reload whenever `changes` settles for `delay`, then run the callbacks.
    /// Used by [`Self::start_watching`]; any other change source works too.
    pub fn spawn_reload_loop(
        &self,
        changes: tokio::sync::mpsc::Receiver<()>,
        delay: Duration,
    ) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(watcher::debounce(changes, delay, move || {
            let registry = registry.clone();
            async move {
                info!("[Registry] Rule file changed, reloading");
                registry.reload().await;
                registry.run_callbacks();
            }
        }))
    }

    /// Register a reload callback without starting an OS watch
    pub fn on_reload<F>(&self, callback: F)
    where
        F: Fn(&[EventSubscription]) + Send + Sync + 'static,
    {
        self.inner.callbacks.lock().push(Arc::new(callback));
    }

    fn run_callbacks(&self) {
        let callbacks: Vec<ReloadCallback> = self.inner.callbacks.lock().clone();
        let rules = self.list();
        for callback in callbacks {
            callback(&rules);
        }
    }

    /// Stop watching and forget the registered callbacks
    pub fn stop_watching(&self) {
        if let Some(state) = self.inner.watch.lock().take() {
            state.task.abort();
            info!("[Registry] Stopped watching");
        }
        self.inner.callbacks.lock().clear();
    }

    pub fn is_watching(&self) -> bool {
        self.inner.watch.lock().is_some()
    }
}

impl RuleSource for SubscriptionRegistry {
    fn rules(&self) -> Vec<EventSubscription> {
        self.list()
    }
}
