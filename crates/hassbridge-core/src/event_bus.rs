//! Lifecycle event broadcast
//!
//! ```text
//!  TokenRefreshEngine ─┐
//!  HubClient ──────────┤                      ┌─► daemon audit log
//!  SubscriptionRegistry┼─► EventSender ─► bus ┤
//!  EventPipeline ──────┘                      └─► tests (EventReceiver)
//! ```
//!
//! Components take an [`EventSender`]. Without a bus they get
//! [`EventSender::detached`] and every emit is dropped.

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{trace, warn};

use crate::DomainEvent;

/// Buffered events per receiver before the slowest one starts lagging
const BUS_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    pub fn sender(&self) -> EventSender {
        EventSender { tx: self.tx.clone() }
    }

    /// Receiver for events emitted after this call
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct EventSender {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventSender {
    /// Sender whose events nobody receives
    pub fn detached() -> Self {
        Self {
            tx: broadcast::channel(1).0,
        }
    }

    /// Publish `event`; returns the number of receivers it reached
    pub fn emit(&self, event: DomainEvent) -> usize {
        let kind = event.type_name();
        let reached = self.tx.send(event).unwrap_or(0);
        trace!(event_type = kind, reached, "[EventBus] Emitted");
        reached
    }

    pub fn has_subscribers(&self) -> bool {
        self.tx.receiver_count() > 0
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::detached()
    }
}

/// Skips over lag instead of failing
pub struct EventReceiver {
    rx: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    /// Next event, or `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "[EventBus] Receiver fell behind, events skipped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<DomainEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "[EventBus] Receiver fell behind, events skipped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Everything buffered right now, oldest first
    pub fn drain(&mut self) -> Vec<DomainEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
