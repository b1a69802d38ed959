//! WebSocket Transport
//!
//! [`Connector`] backed by `tokio-tungstenite`. Each connection gets its own
//! I/O task that owns both halves of the socket:
//!
//! - outbound text frames arrive over an unbounded channel and are written
//!   in order
//! - inbound text frames are forwarded as [`TransportEvent::Text`]
//! - protocol Pings are answered, and a keepalive loop pings the server
//! - the task ends with one final `Closed` or `Error` event
//!
//! Dropping the [`Connection`] cancels the task, which sends a Close frame on
//! its way out.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use crate::application::ports::{Connection, Connector, TransportError, TransportEvent};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound events buffered per socket before the reader waits.
const INBOUND_BUFFER: usize = 256;

/// Opens quote-stream sockets with `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector {
    heartbeat: HeartbeatConfig,
}

impl TungsteniteConnector {
    /// Create a connector with the given keepalive timing.
    #[must_use]
    pub const fn new(heartbeat: HeartbeatConfig) -> Self {
        Self { heartbeat }
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Connection, TransportError> {
        let (socket, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        tracing::debug!(status = %response.status(), "WebSocket upgrade complete");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let stop = CancellationToken::new();

        tokio::spawn(run_socket(
            socket,
            outbound_rx,
            inbound_tx,
            stop.clone(),
            self.heartbeat.clone(),
        ));

        Ok(Connection::new(outbound_tx, inbound_rx).with_stop_token(stop))
    }
}

/// I/O loop for one socket.
async fn run_socket(
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::Sender<TransportEvent>,
    stop: CancellationToken,
    heartbeat: HeartbeatConfig,
) {
    let (mut write, mut read) = socket.split();

    let liveness = Arc::new(HeartbeatState::new());
    let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(4);
    let heartbeat_cancel = stop.child_token();
    tokio::spawn(
        HeartbeatManager::new(
            heartbeat,
            liveness.clone(),
            heartbeat_tx,
            heartbeat_cancel.clone(),
        )
        .run(),
    );
    let mut heartbeat_alive = true;

    let last_event = loop {
        tokio::select! {
            () = stop.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break None;
            }
            frame = outbound.recv() => {
                let Some(text) = frame else {
                    let _ = write.send(Message::Close(None)).await;
                    break None;
                };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    break Some(TransportEvent::Error(e.to_string()));
                }
            }
            event = heartbeat_rx.recv(), if heartbeat_alive => {
                match event {
                    Some(HeartbeatEvent::SendPing) => {
                        liveness.mark_ping_sent();
                        if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                            break Some(TransportEvent::Error(e.to_string()));
                        }
                    }
                    Some(HeartbeatEvent::Timeout) => {
                        break Some(TransportEvent::Error("keepalive timeout".to_string()));
                    }
                    None => heartbeat_alive = false,
                }
            }
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        liveness.record_activity();
                        if inbound.send(TransportEvent::Text(text.as_str().to_owned())).await.is_err() {
                            break None;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        liveness.record_activity();
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            break Some(TransportEvent::Error(e.to_string()));
                        }
                    }
                    Some(Ok(Message::Pong(_))) => liveness.record_activity(),
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_owned())
                            .unwrap_or_default();
                        tracing::debug!(reason = %reason, "Server sent close frame");
                        break Some(TransportEvent::Closed { reason });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Some(TransportEvent::Error(e.to_string())),
                    None => {
                        break Some(TransportEvent::Closed {
                            reason: "stream ended".to_string(),
                        });
                    }
                }
            }
        }
    };

    heartbeat_cancel.cancel();
    if let Some(event) = last_event {
        let _ = inbound.send(event).await;
    }
    tracing::trace!("Socket task finished");
}
