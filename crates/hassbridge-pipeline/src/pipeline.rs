//! Event admission and concurrency-limited drain
//!
//! Every incoming hub event is matched against the enabled rules. Each
//! matching rule yields one task in a bounded FIFO. At most
//! `max_concurrent` tasks run at once; a finishing task immediately admits
//! the next ones. In-flight tasks are never cancelled.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use hassbridge_core::{DomainEvent, EventSender, HubEvent, RuleSource};

use crate::queue::{EventQueue, QueuedTask};

/// Runs one queued task to completion; returns whether it succeeded
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: QueuedTask) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineLimits {
    pub max_concurrent: usize,
    pub max_queue: usize,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_queue: 20,
        }
    }
}

struct DrainState {
    queue: EventQueue<QueuedTask>,
    active: usize,
}

struct PipelineInner {
    rules: Arc<dyn RuleSource>,
    handler: Arc<dyn TaskHandler>,
    limits: PipelineLimits,
    state: Mutex<DrainState>,
    idle: Notify,
    events: Option<EventSender>,
}

#[derive(Clone)]
pub struct EventPipeline {
    inner: Arc<PipelineInner>,
}

impl EventPipeline {
    pub fn new(rules: Arc<dyn RuleSource>, handler: Arc<dyn TaskHandler>) -> Self {
        Self::with_limits(rules, handler, PipelineLimits::default())
    }

    pub fn with_limits(
        rules: Arc<dyn RuleSource>,
        handler: Arc<dyn TaskHandler>,
        limits: PipelineLimits,
    ) -> Self {
        let limits = PipelineLimits {
            max_concurrent: limits.max_concurrent.max(1),
            max_queue: limits.max_queue.max(1),
        };
        Self {
            inner: Arc::new(PipelineInner {
                rules,
                handler,
                limits,
                state: Mutex::new(DrainState {
                    queue: EventQueue::new(limits.max_queue),
                    active: 0,
                }),
                idle: Notify::new(),
                events: None,
            }),
        }
    }

    /// Publish queue decisions on the event bus.
    ///
    /// Only effective before the pipeline is cloned.
    pub fn with_events(mut self, events: EventSender) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.events = Some(events);
        }
        self
    }

    pub fn limits(&self) -> PipelineLimits {
        self.inner.limits
    }

    /// Match `event` against the enabled rules and queue one task per match.
    ///
    /// Returns the number of matching rules. Must be called within a Tokio
    /// runtime.
    pub fn handle_event(&self, event: &HubEvent) -> usize {
        let matched = self
            .inner
            .rules
            .enabled_rules()
            .into_iter()
            .filter(|rule| rule.matches(event))
            .collect::<Vec<_>>();

        if matched.is_empty() {
            return 0;
        }

        debug!(
            event_type = %event.event_type,
            matched = matched.len(),
            "[Pipeline] Event matched rules"
        );

        let count = matched.len();
        let event = Arc::new(event.clone());
        for rule in matched {
            self.enqueue(QueuedTask::new(event.clone(), rule));
        }
        self.drain();
        count
    }

    /// Queue a task, dropping the oldest queued one if the queue is full
    pub fn enqueue(&self, task: QueuedTask) {
        let event_type = task.event.event_type.clone();
        let rule = task.rule.name.clone();

        let (dropped, queue_len) = {
            let mut state = self.inner.state.lock();
            let dropped = state.queue.push(task);
            (dropped, state.queue.len())
        };

        if let Some(dropped) = dropped {
            warn!(
                event_type = %dropped.event.event_type,
                rule = %dropped.rule.name,
                max_queue = self.inner.limits.max_queue,
                "[Pipeline] Queue full, dropping oldest event"
            );
            self.emit(DomainEvent::EventDropped {
                event_type: dropped.event.event_type.clone(),
                rule: dropped.rule.name.clone(),
            });
        }

        self.emit(DomainEvent::EventQueued {
            event_type,
            rule,
            queue_len,
        });
    }

    /// Admit queued tasks while below the concurrency limit
    pub fn drain(&self) {
        let admitted = {
            let mut state = self.inner.state.lock();
            let mut admitted = Vec::new();
            while state.active < self.inner.limits.max_concurrent {
                let Some(task) = state.queue.pop() else {
                    break;
                };
                state.active += 1;
                admitted.push(task);
            }
            admitted
        };

        for task in admitted {
            let pipeline = self.clone();
            tokio::spawn(async move { pipeline.run(task).await });
        }
    }

    async fn run(self, task: QueuedTask) {
        let event_type = task.event.event_type.clone();
        let rule = task.rule.name.clone();

        // A panicking handler must still release its slot.
        let handler = self.inner.handler.clone();
        let success = match tokio::spawn(async move { handler.handle(task).await }).await {
            Ok(success) => success,
            Err(e) => {
                error!(event_type = %event_type, rule = %rule, error = %e, "[Pipeline] Task aborted");
                false
            }
        };

        self.emit(DomainEvent::EventProcessed {
            event_type,
            rule,
            success,
        });

        let idle = {
            let mut state = self.inner.state.lock();
            state.active = state.active.saturating_sub(1);
            state.active == 0 && state.queue.is_empty()
        };
        if idle {
            self.inner.idle.notify_waiters();
        }
        self.drain();
    }

    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn active(&self) -> usize {
        self.inner.state.lock().active
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        state.active == 0 && state.queue.is_empty()
    }

    /// Resolve once nothing is queued or running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    fn emit(&self, event: DomainEvent) {
        if let Some(events) = &self.inner.events {
            events.emit(event);
        }
    }
}
