//! In-process hub speaking the realtime socket protocol
//!
//! Enough of the server side to exercise the client: the auth handshake,
//! `subscribe_events` results, `ping`/`pong`, pushed events and forced
//! disconnects. Every frame a client sends after authenticating is recorded
//! together with the number of the connection it arrived on.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

pub const HUB_TOKEN: &str = "hub-test-token";

#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedFrame {
    /// 1-based number of the authenticated connection
    pub connection: usize,
    pub frame: Value,
}

struct HubState {
    token: String,
    accepting: AtomicBool,
    answer_pings: AtomicBool,
    connections: AtomicUsize,
    frames: Mutex<Vec<ReceivedFrame>>,
    live: Mutex<Vec<mpsc::UnboundedSender<Message>>>,
}

pub struct FakeHub {
    addr: SocketAddr,
    state: Arc<HubState>,
    task: JoinHandle<()>,
}

impl FakeHub {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake hub");
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(HubState {
            token: HUB_TOKEN.to_string(),
            accepting: AtomicBool::new(true),
            answer_pings: AtomicBool::new(true),
            connections: AtomicUsize::new(0),
            frames: Mutex::new(Vec::new()),
            live: Mutex::new(Vec::new()),
        });

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(serve(stream, state));
            }
        });

        Self { addr, state, task }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/api/websocket", self.addr)
    }

    /// Authenticated connections so far
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> Vec<ReceivedFrame> {
        self.state.frames.lock().clone()
    }

    /// Event types subscribed on connection number `connection`
    pub fn subscriptions_on(&self, connection: usize) -> Vec<String> {
        self.state
            .frames
            .lock()
            .iter()
            .filter(|f| f.connection == connection && f.frame["type"] == "subscribe_events")
            .filter_map(|f| f.frame["event_type"].as_str().map(str::to_string))
            .collect()
    }

    pub fn pings(&self) -> usize {
        self.state
            .frames
            .lock()
            .iter()
            .filter(|f| f.frame["type"] == "ping")
            .count()
    }

    /// Refuse new connections by dropping them before the handshake
    pub fn set_accepting(&self, accepting: bool) {
        self.state.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn set_answer_pings(&self, answer: bool) {
        self.state.answer_pings.store(answer, Ordering::SeqCst);
    }

    /// Push an event frame to every live connection
    pub fn push_event(&self, event_type: &str, data: Value) {
        let frame = json!({
            "id": 1,
            "type": "event",
            "event": {
                "event_type": event_type,
                "data": data,
                "origin": "LOCAL",
                "time_fired": "2026-03-01T21:00:00.000000+00:00",
                "context": { "id": "01HX", "parent_id": null, "user_id": null }
            }
        });
        self.push_raw(frame);
    }

    pub fn push_raw(&self, frame: Value) {
        let text = frame.to_string();
        for tx in self.state.live.lock().iter() {
            let _ = tx.send(Message::Text(text.clone()));
        }
    }

    /// Close every live connection from the server side
    pub fn drop_connections(&self) {
        for tx in self.state.live.lock().drain(..) {
            let _ = tx.send(Message::Close(None));
        }
    }
}

impl Drop for FakeHub {
    fn drop(&mut self) {
        self.task.abort();
        self.drop_connections();
    }
}

async fn serve(stream: TcpStream, state: Arc<HubState>) {
    if !state.accepting.load(Ordering::SeqCst) {
        drop(stream);
        return;
    }
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    let required = json!({ "type": "auth_required", "ha_version": "2026.3.0" });
    if write.send(Message::Text(required.to_string())).await.is_err() {
        return;
    }

    let auth = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => break serde_json::from_str::<Value>(&text).unwrap_or_default(),
            Some(Ok(_)) => continue,
            _ => return,
        }
    };
    if auth["type"] != "auth" || auth["access_token"] != state.token.as_str() {
        let invalid = json!({ "type": "auth_invalid", "message": "Invalid access token or password" });
        let _ = write.send(Message::Text(invalid.to_string())).await;
        let _ = write.close().await;
        return;
    }
    let ok = json!({ "type": "auth_ok", "ha_version": "2026.3.0" });
    if write.send(Message::Text(ok.to_string())).await.is_err() {
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.live.lock().push(tx);
    let connection = state.connections.fetch_add(1, Ordering::SeqCst) + 1;

    loop {
        tokio::select! {
            frame = read.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                state.frames.lock().push(ReceivedFrame { connection, frame: frame.clone() });

                let reply = match frame["type"].as_str() {
                    Some("ping") if state.answer_pings.load(Ordering::SeqCst) => {
                        Some(json!({ "id": frame["id"], "type": "pong" }))
                    }
                    Some("subscribe_events") | Some("unsubscribe_events") => {
                        Some(json!({ "id": frame["id"], "type": "result", "success": true, "result": null }))
                    }
                    _ => None,
                };
                if let Some(reply) = reply {
                    if write.send(Message::Text(reply.to_string())).await.is_err() {
                        break;
                    }
                }
            }
            outgoing = rx.recv() => {
                let Some(message) = outgoing else { break };
                let closing = matches!(message, Message::Close(_));
                if write.send(message).await.is_err() || closing {
                    break;
                }
            }
        }
    }
}
