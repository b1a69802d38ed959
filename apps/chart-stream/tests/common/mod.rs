//! Shared fixtures for integration tests.
//!
//! [`ScriptedConnector`] stands in for the WebSocket transport: each endpoint
//! can be scripted to accept, stall, or refuse, and every accepted socket is
//! handed to the test as a [`Peer`] that plays the quote service.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chart_stream::{
    ConnectionState, Connection, Connector, StreamConfig, StreamEvent, TransportError,
    TransportEvent,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

/// How long a test waits for something that should happen promptly.
pub const WAIT: Duration = Duration::from_secs(5);

/// What a scripted endpoint does with a connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Open a socket immediately.
    Accept,
    /// Never complete the handshake.
    Stall,
    /// Fail the connect.
    Refuse,
}

/// Server side of one accepted socket.
pub struct Peer {
    /// URL the client connected to.
    pub url: String,
    frames: mpsc::UnboundedReceiver<String>,
    events: mpsc::Sender<TransportEvent>,
}

impl Peer {
    /// Next frame the client sent, parsed as JSON.
    pub async fn next_frame(&mut self) -> Value {
        let text = tokio::time::timeout(WAIT, self.frames.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client dropped the socket");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// A frame the client already sent, without waiting.
    pub fn try_frame(&mut self) -> Option<Value> {
        self.frames
            .try_recv()
            .ok()
            .map(|text| serde_json::from_str(&text).expect("client sent invalid JSON"))
    }

    /// Deliver a JSON frame to the client.
    pub async fn send(&self, value: Value) {
        self.events
            .send(TransportEvent::Text(value.to_string()))
            .await
            .expect("client dropped the socket");
    }

    /// Deliver a raw text frame to the client.
    pub async fn send_text(&self, text: &str) {
        self.events
            .send(TransportEvent::Text(text.to_string()))
            .await
            .expect("client dropped the socket");
    }

    /// Close the socket from the server side.
    pub async fn close(&self, reason: &str) {
        let _ = self
            .events
            .send(TransportEvent::Closed {
                reason: reason.to_string(),
            })
            .await;
    }

    /// Whether the client has dropped its end.
    pub fn client_gone(&self) -> bool {
        self.events.is_closed()
    }
}

/// In-memory connector with per-endpoint behaviour.
pub struct ScriptedConnector {
    behaviors: Mutex<HashMap<String, Behavior>>,
    connects: Mutex<Vec<String>>,
    sockets: Mutex<Vec<mpsc::Sender<TransportEvent>>>,
    peers: mpsc::UnboundedSender<Peer>,
}

impl ScriptedConnector {
    /// Create a connector that accepts everything unless told otherwise.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                behaviors: Mutex::new(HashMap::new()),
                connects: Mutex::new(Vec::new()),
                sockets: Mutex::new(Vec::new()),
                peers,
            }),
            rx,
        )
    }

    /// Script the endpoint whose base URL is `endpoint`.
    pub fn script(&self, endpoint: &str, behavior: Behavior) {
        self.behaviors.lock().insert(endpoint.to_string(), behavior);
    }

    /// Every URL a connect was attempted on, in order.
    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().clone()
    }

    /// Sockets the client still holds.
    pub fn live_sockets(&self) -> usize {
        self.sockets.lock().iter().filter(|s| !s.is_closed()).count()
    }

    fn behavior(&self, url: &str) -> Behavior {
        let base = url.split('?').next().unwrap_or(url);
        self.behaviors
            .lock()
            .get(base)
            .copied()
            .unwrap_or(Behavior::Accept)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &str) -> Result<Connection, TransportError> {
        self.connects.lock().push(url.to_string());

        match self.behavior(url) {
            Behavior::Accept => {
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let (in_tx, in_rx) = mpsc::channel(64);
                self.sockets.lock().push(in_tx.clone());
                let _ = self.peers.send(Peer {
                    url: url.to_string(),
                    frames: out_rx,
                    events: in_tx,
                });
                Ok(Connection::new(out_tx, in_rx))
            }
            Behavior::Stall => pending().await,
            Behavior::Refuse => Err(TransportError::ConnectFailed(
                "connection refused".to_string(),
            )),
        }
    }
}

/// Config with the given endpoint base URLs and no waiting between them.
pub fn config(endpoints: &[&str]) -> StreamConfig {
    StreamConfig::new(
        endpoints.iter().map(|e| (*e).to_string()).collect(),
        "1089",
    )
}

/// Next accepted socket.
pub async fn next_peer(peers: &mut mpsc::UnboundedReceiver<Peer>) -> Peer {
    tokio::time::timeout(WAIT, peers.recv())
        .await
        .expect("timed out waiting for a connect")
        .expect("connector dropped")
}

/// Next event delivered to the sink.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<StreamEvent>) -> StreamEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("client task ended")
}

/// Skip events until a status change to `state`, returning its message.
pub async fn wait_for_state(
    events: &mut mpsc::UnboundedReceiver<StreamEvent>,
    state: ConnectionState,
) -> Option<String> {
    loop {
        if let StreamEvent::Status {
            state: seen,
            message,
        } = next_event(events).await
            && seen == state
        {
            return message;
        }
    }
}

/// Drain everything already delivered.
pub fn drain(events: &mut mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
