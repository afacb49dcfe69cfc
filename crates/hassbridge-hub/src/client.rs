//! Realtime hub client
//!
//! ```text
//! connect() ── handshake (auth_required → auth → auth_ok) ── spawn supervisor
//!
//! supervisor:  ┌─► run connection (read frames, heartbeat) ──┐
//!              │                                             │ lost
//!              └── resubscribe ◄── reconnect with backoff ◄──┘
//!                                        │ exhausted
//!                                        └─► connection_failed observers
//! ```
//!
//! Outgoing frames go through a channel to a writer task, so callers never
//! hold the socket. Subscriptions are tracked as `id → event_type`; after a
//! reconnect the map is cleared and rebuilt from the live event type source.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitStream, StreamExt};
use futures::SinkExt;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hassbridge_core::{DomainEvent, EventSender, HubEndpoint, HubEvent};

use crate::error::{HubError, HubResult};
use crate::policy::{HeartbeatPolicy, ReconnectPolicy};
use crate::protocol::{IncomingMessage, OutgoingMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type EventCallback = Arc<dyn Fn(&HubEvent) + Send + Sync>;
type LifecycleCallback = Arc<dyn Fn() + Send + Sync>;
type EventTypeSource = Arc<dyn Fn() -> BTreeSet<String> + Send + Sync>;

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Observers {
    event: Vec<EventCallback>,
    reconnected: Vec<LifecycleCallback>,
    connection_failed: Vec<LifecycleCallback>,
    auth_failed: Vec<LifecycleCallback>,
}

/// Why a connection's read loop stopped
enum ConnectionEnd {
    Cancelled,
    Lost(String),
}

/// A connection whose writer task is running
struct Attached {
    read: SplitStream<WsStream>,
    writer: JoinHandle<()>,
}

struct ClientInner {
    ws_url: String,
    token: String,
    reconnect: ReconnectPolicy,
    heartbeat: HeartbeatPolicy,
    handshake_timeout: Duration,
    observers: RwLock<Observers>,
    event_type_source: RwLock<Option<EventTypeSource>>,
    next_id: AtomicU64,
    subscriptions: Mutex<BTreeMap<u64, String>>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    connected: AtomicBool,
    intentional_close: AtomicBool,
    shutdown: Mutex<CancellationToken>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    events: EventSender,
}

/// Cheap to clone; clones share the connection
#[derive(Clone)]
pub struct HubClient {
    inner: Arc<ClientInner>,
}

impl HubClient {
    pub fn new(endpoint: &HubEndpoint) -> Self {
        Self::with_url(endpoint.websocket_url(), endpoint.token.clone())
    }

    /// Client for an explicit `ws://` / `wss://` URL
    pub fn with_url(ws_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                ws_url: ws_url.into(),
                token: token.into(),
                reconnect: ReconnectPolicy::default(),
                heartbeat: HeartbeatPolicy::default(),
                handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
                observers: RwLock::new(Observers::default()),
                event_type_source: RwLock::new(None),
                next_id: AtomicU64::new(0),
                subscriptions: Mutex::new(BTreeMap::new()),
                outgoing: Mutex::new(None),
                connected: AtomicBool::new(false),
                intentional_close: AtomicBool::new(false),
                shutdown: Mutex::new(CancellationToken::new()),
                supervisor: Mutex::new(None),
                events: EventSender::detached(),
            }),
        }
    }

    /// Policies and the event sender can only be changed before the first
    /// clone is made.
    fn inner_mut(&mut self) -> Option<&mut ClientInner> {
        Arc::get_mut(&mut self.inner)
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        if let Some(inner) = self.inner_mut() {
            inner.reconnect = policy;
        }
        self
    }

    pub fn with_heartbeat_policy(mut self, policy: HeartbeatPolicy) -> Self {
        if let Some(inner) = self.inner_mut() {
            inner.heartbeat = policy;
        }
        self
    }

    pub fn with_handshake_timeout(mut self, limit: Duration) -> Self {
        if let Some(inner) = self.inner_mut() {
            inner.handshake_timeout = limit;
        }
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        if let Some(inner) = self.inner_mut() {
            inner.events = events;
        }
        self
    }

    pub fn url(&self) -> &str {
        &self.inner.ws_url
    }

    // ════════════════════════════════════════════════════════════════════
    // Observers
    // ════════════════════════════════════════════════════════════════════

    /// Called for every hub event; a panicking handler is logged and skipped
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&HubEvent) + Send + Sync + 'static,
    {
        self.inner.observers.write().event.push(Arc::new(handler));
    }

    /// Called after a reconnect has re-authenticated and resubscribed
    pub fn on_reconnected<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.observers.write().reconnected.push(Arc::new(handler));
    }

    /// Called once when all reconnect attempts are exhausted
    pub fn on_connection_failed<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .observers
            .write()
            .connection_failed
            .push(Arc::new(handler));
    }

    pub fn on_auth_failed<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.observers.write().auth_failed.push(Arc::new(handler));
    }

    /// Live set of event types to subscribe after a reconnect
    pub fn set_event_type_source<F>(&self, source: F)
    where
        F: Fn() -> BTreeSet<String> + Send + Sync + 'static,
    {
        *self.inner.event_type_source.write() = Some(Arc::new(source));
    }

    // ════════════════════════════════════════════════════════════════════
    // Connection lifecycle
    // ════════════════════════════════════════════════════════════════════

    /// Connect and authenticate. Returns once `auth_ok` is received; the
    /// connection is then maintained in the background until `disconnect()`.
    pub async fn connect(&self) -> HubResult<()> {
        if self.is_running() {
            debug!("[HubClient] Already connected");
            return Ok(());
        }

        self.inner.intentional_close.store(false, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        *self.inner.shutdown.lock() = cancel.clone();

        info!(url = %self.inner.ws_url, "[HubClient] Connecting");
        let ws = match self.inner.open_connection().await {
            Ok(ws) => ws,
            Err(e) => {
                if let HubError::AuthInvalid(message) = &e {
                    self.inner.report_auth_failed(message);
                }
                return Err(e);
            }
        };

        let attached = self.inner.attach(ws, false);
        self.inner.events.emit(DomainEvent::HubConnected {
            url: self.inner.ws_url.clone(),
        });

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.supervise(attached, cancel).await });
        *self.inner.supervisor.lock() = Some(handle);
        Ok(())
    }

    /// Close the connection and suppress any reconnect
    pub async fn disconnect(&self) {
        self.inner.intentional_close.store(true, Ordering::SeqCst);
        self.inner.shutdown.lock().cancel();

        let handle = self.inner.supervisor.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.inner.subscriptions.lock().clear();
        self.inner.connected.store(false, Ordering::SeqCst);
        info!("[HubClient] Disconnected");
    }

    /// Authenticated socket currently open
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Connected or reconnecting
    fn is_running(&self) -> bool {
        self.inner
            .supervisor
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    // ════════════════════════════════════════════════════════════════════
    // Subscriptions
    // ════════════════════════════════════════════════════════════════════

    /// Subscribe to an event type, returning the subscription id
    pub fn subscribe_events(&self, event_type: &str) -> u64 {
        self.inner.subscribe(event_type)
    }

    /// Cancel a subscription by id
    pub fn unsubscribe_events(&self, subscription: u64) {
        let id = self.inner.next_id();
        self.inner.subscriptions.lock().remove(&subscription);
        self.inner
            .send(&OutgoingMessage::UnsubscribeEvents { id, subscription });
        info!(subscription, "[HubClient] Unsubscribed");
    }

    /// Event types with a live subscription
    pub fn subscribed_types(&self) -> BTreeSet<String> {
        self.inner.subscriptions.lock().values().cloned().collect()
    }

    /// Subscribe every type in `active` not already subscribed, returning
    /// the newly subscribed types.
    ///
    /// Types no longer in `active` stay subscribed: unsubscribing needs the
    /// id, and ids are not owned per rule. Their events are filtered out by
    /// rule matching instead.
    pub fn sync_event_types(&self, active: &BTreeSet<String>) -> Vec<String> {
        let mut subscriptions = self.inner.subscriptions.lock();
        let current: BTreeSet<String> = subscriptions.values().cloned().collect();

        let added: Vec<String> = active
            .iter()
            .filter(|t| !current.contains(*t))
            .cloned()
            .collect();
        for event_type in &added {
            self.inner.subscribe_locked(&mut subscriptions, event_type);
        }
        drop(subscriptions);

        for stale in current.difference(active) {
            info!(
                event_type = %stale,
                "[HubClient] Event type no longer used by any rule; events will be filtered"
            );
        }
        added
    }
}

impl ClientInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn subscribe(&self, event_type: &str) -> u64 {
        let mut subscriptions = self.subscriptions.lock();
        self.subscribe_locked(&mut subscriptions, event_type)
    }

    /// Record and send a subscription. The caller holds the subscriptions
    /// lock, which is always taken before `outgoing`.
    fn subscribe_locked(&self, subscriptions: &mut BTreeMap<u64, String>, event_type: &str) -> u64 {
        let id = self.next_id();
        subscriptions.insert(id, event_type.to_string());
        self.send(&OutgoingMessage::SubscribeEvents {
            id,
            event_type: event_type.to_string(),
        });
        info!(event_type, id, "[HubClient] Subscribed");
        id
    }

    /// Queue a frame for the writer; dropped with a log line when offline
    fn send(&self, message: &OutgoingMessage) -> bool {
        let Some(frame) = encode(message) else {
            return false;
        };
        match self.outgoing.lock().as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => {
                debug!(kind = message.kind(), "[HubClient] Not connected, frame not sent");
                false
            }
        }
    }

    /// Connect and run the auth handshake
    async fn open_connection(&self) -> HubResult<WsStream> {
        timeout(self.handshake_timeout, self.handshake())
            .await
            .map_err(|_| HubError::Timeout("authentication"))?
    }

    async fn handshake(&self) -> HubResult<WsStream> {
        let (mut ws, _) = connect_async(self.ws_url.as_str()).await?;

        match next_message(&mut ws).await? {
            IncomingMessage::AuthRequired { ha_version } => {
                debug!(version = ?ha_version, "[HubClient] Auth required");
            }
            other => {
                return Err(HubError::Protocol(format!(
                    "expected auth_required, got {:?}",
                    other
                )))
            }
        }

        let auth = serde_json::to_string(&OutgoingMessage::Auth {
            access_token: self.token.clone(),
        })?;
        ws.send(Message::Text(auth)).await?;

        match next_message(&mut ws).await? {
            IncomingMessage::AuthOk { ha_version } => {
                info!(version = ?ha_version, "[HubClient] Authenticated");
                Ok(ws)
            }
            IncomingMessage::AuthInvalid { message } => {
                let message = message.unwrap_or_else(|| "invalid access token".to_string());
                let _ = ws.close(None).await;
                Err(HubError::AuthInvalid(message))
            }
            other => Err(HubError::Protocol(format!(
                "expected auth_ok, got {:?}",
                other
            ))),
        }
    }

    /// Split the socket, start its writer task and publish its sender.
    ///
    /// With `resubscribe` set the subscription map is rebuilt and its frames
    /// queued before the sender is published, under the subscriptions lock.
    /// A concurrent `sync_event_types` then either runs first (offline, so it
    /// only records) or sees the rebuilt map.
    fn attach(&self, ws: WsStream, resubscribe: bool) -> Attached {
        let (mut write, read) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = write.send(frame).await {
                    warn!(error = %e, "[HubClient] Write failed");
                    break;
                }
            }
            let _ = write.close().await;
        });

        let mut subscriptions = self.subscriptions.lock();
        let resubscribed = resubscribe.then(|| self.rebuild_subscriptions(&mut subscriptions, &tx));
        *self.outgoing.lock() = Some(tx);
        self.connected.store(true, Ordering::SeqCst);
        drop(subscriptions);

        if let Some(types) = resubscribed {
            info!(count = types.len(), "[HubClient] Re-subscribed event types");
            self.events.emit(DomainEvent::HubReconnected {
                event_types: types.into_iter().collect(),
            });
        }
        Attached { read, writer }
    }

    async fn detach(&self, writer: JoinHandle<()>) {
        self.connected.store(false, Ordering::SeqCst);
        // dropping the last sender lets the writer close the socket
        self.outgoing.lock().take();
        if timeout(WRITER_SHUTDOWN_TIMEOUT, writer).await.is_err() {
            debug!("[HubClient] Writer did not finish in time");
        }
    }

    async fn supervise(self: Arc<Self>, first: Attached, cancel: CancellationToken) {
        let mut attached = first;
        loop {
            let Attached { read, writer } = attached;
            let end = self.run_connection(read, &cancel).await;
            self.detach(writer).await;

            match end {
                ConnectionEnd::Cancelled => return,
                ConnectionEnd::Lost(_) if self.intentional_close.load(Ordering::SeqCst) => return,
                ConnectionEnd::Lost(reason) => {
                    warn!(reason = %reason, "[HubClient] Connection lost");
                }
            }

            let Some(ws) = self.reconnect(&cancel).await else {
                return;
            };
            attached = self.attach(ws, true);
            self.report_reconnected();
        }
    }

    async fn run_connection(
        &self,
        mut read: SplitStream<WsStream>,
        cancel: &CancellationToken,
    ) -> ConnectionEnd {
        let interval = self.heartbeat.interval;
        let mut ping = tokio::time::interval_at(Instant::now() + interval, interval);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return ConnectionEnd::Cancelled,

                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text, &mut pong_deadline),
                    Some(Ok(Message::Close(_))) | None => {
                        return ConnectionEnd::Lost("closed by hub".to_string());
                    }
                    Some(Err(e)) => return ConnectionEnd::Lost(e.to_string()),
                    // protocol-level ping/pong frames are answered by tungstenite
                    Some(Ok(_)) => {}
                },

                _ = ping.tick() => {
                    if pong_deadline.is_some() {
                        warn!("[HubClient] Previous ping unanswered, closing connection");
                        return ConnectionEnd::Lost("pong timeout".to_string());
                    }
                    let id = self.next_id();
                    if self.send(&OutgoingMessage::Ping { id }) {
                        pong_deadline = Some(Instant::now() + self.heartbeat.pong_timeout);
                    }
                }

                _ = sleep_until(pong_deadline.unwrap_or_else(Instant::now)), if pong_deadline.is_some() => {
                    warn!(
                        timeout_ms = self.heartbeat.pong_timeout.as_millis() as u64,
                        "[HubClient] Pong not received in time, closing connection"
                    );
                    return ConnectionEnd::Lost("pong timeout".to_string());
                }
            }
        }
    }

    fn handle_text(&self, text: &str, pong_deadline: &mut Option<Instant>) {
        let message = match serde_json::from_str::<IncomingMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "[HubClient] Unparseable frame");
                return;
            }
        };

        match message {
            IncomingMessage::Event { event, .. } => self.dispatch_event(&event),
            IncomingMessage::Pong { .. } => *pong_deadline = None,
            IncomingMessage::Result {
                id,
                success: false,
                error,
            } => {
                error!(id = ?id, error = ?error, "[HubClient] Command failed");
            }
            IncomingMessage::Result { .. } => {}
            IncomingMessage::AuthInvalid { message } => {
                warn!(message = ?message, "[HubClient] Unexpected auth_invalid on open connection");
            }
            other => debug!(frame = ?other, "[HubClient] Ignoring frame"),
        }
    }

    fn dispatch_event(&self, event: &HubEvent) {
        let handlers = self.observers.read().event.clone();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(event_type = %event.event_type, "[HubClient] Event handler panicked");
            }
        }
    }

    /// Backoff loop; `None` when cancelled, rejected, or out of attempts
    async fn reconnect(&self, cancel: &CancellationToken) -> Option<WsStream> {
        let max_attempts = self.reconnect.max_attempts;

        for attempt in 1..=max_attempts {
            let delay = self.reconnect.delay_for_attempt(attempt);
            info!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "[HubClient] Reconnecting"
            );

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = sleep(delay) => {}
            }
            if self.intentional_close.load(Ordering::SeqCst) {
                return None;
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return None,
                result = self.open_connection() => result,
            };
            match result {
                Ok(ws) => {
                    info!(attempt, "[HubClient] Reconnected");
                    return Some(ws);
                }
                Err(HubError::AuthInvalid(message)) => {
                    self.report_auth_failed(&message);
                    return None;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "[HubClient] Reconnect attempt failed");
                }
            }
        }

        error!(max_attempts, "[HubClient] Giving up after reconnect attempts");
        self.events.emit(DomainEvent::HubConnectionFailed {
            attempts: max_attempts,
        });
        let handlers = self.observers.read().connection_failed.clone();
        run_lifecycle_handlers(&handlers, "connection_failed");
        None
    }

    /// Replace the subscriptions with the live event types (or the previous
    /// ones without a source), queueing one frame per type on `tx`
    fn rebuild_subscriptions(
        &self,
        subscriptions: &mut BTreeMap<u64, String>,
        tx: &mpsc::UnboundedSender<Message>,
    ) -> BTreeSet<String> {
        let previous: BTreeSet<String> = std::mem::take(subscriptions).into_values().collect();
        let source = self.event_type_source.read().clone();
        let types = match source {
            Some(source) => source(),
            None => previous,
        };

        for event_type in &types {
            let id = self.next_id();
            subscriptions.insert(id, event_type.clone());
            let frame = encode(&OutgoingMessage::SubscribeEvents {
                id,
                event_type: event_type.clone(),
            });
            if let Some(frame) = frame {
                let _ = tx.send(frame);
            }
            debug!(event_type = %event_type, id, "[HubClient] Subscribed");
        }
        types
    }

    fn report_reconnected(&self) {
        let handlers = self.observers.read().reconnected.clone();
        run_lifecycle_handlers(&handlers, "reconnected");
    }

    fn report_auth_failed(&self, message: &str) {
        error!(message, "[HubClient] Authentication failed");
        self.events.emit(DomainEvent::HubAuthFailed {
            message: message.to_string(),
        });
        let handlers = self.observers.read().auth_failed.clone();
        run_lifecycle_handlers(&handlers, "auth_failed");
    }
}

fn run_lifecycle_handlers(handlers: &[LifecycleCallback], name: &str) {
    for handler in handlers {
        if catch_unwind(AssertUnwindSafe(|| handler())).is_err() {
            error!(callback = name, "[HubClient] Lifecycle handler panicked");
        }
    }
}

fn encode(message: &OutgoingMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(text) => Some(Message::Text(text)),
        Err(e) => {
            error!(kind = message.kind(), error = %e, "[HubClient] Cannot encode frame");
            None
        }
    }
}

/// Next text frame decoded as a protocol message
async fn next_message(ws: &mut WsStream) -> HubResult<IncomingMessage> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
            Some(Ok(Message::Close(_))) | None => return Err(HubError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}
