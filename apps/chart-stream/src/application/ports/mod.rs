//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Connector`: opens a socket to an endpoint and hands back a [`Connection`]
//!
//! ## Driver Ports (Inbound)
//!
//! - `EventSink`: receives status changes, market data and errors

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::domain::streaming::{CandleBar, ConnectionState, ErrorEvent, TickUpdate};

// =============================================================================
// Event Sink
// =============================================================================

/// Consumer-facing contract of the streaming client.
///
/// All calls for one client are made from that client's manager task, in
/// order, never concurrently. Implementations must not block.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    /// The connection state changed.
    fn on_status_change(&self, state: ConnectionState, message: Option<String>);

    /// A live tick arrived.
    fn on_tick(&self, update: TickUpdate);

    /// A historical candle snapshot arrived (oldest first).
    fn on_candles(&self, bars: Vec<CandleBar>);

    /// An error occurred; see [`ErrorEvent::fatal`].
    fn on_error(&self, event: ErrorEvent);
}

// =============================================================================
// Transport
// =============================================================================

/// Transport-level errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The endpoint could not be reached or refused the upgrade.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The socket is gone.
    #[error("socket closed")]
    Closed,
}

/// Something that happened on an open socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame.
    Text(String),
    /// The peer closed the socket.
    Closed {
        /// Close reason, if any.
        reason: String,
    },
    /// The socket failed.
    Error(String),
}

/// An open socket.
///
/// Frames are exchanged over channels so the owner never awaits a write.
/// Dropping the connection stops its I/O task.
#[derive(Debug)]
pub struct Connection {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::Receiver<TransportEvent>,
    _stop: Option<DropGuard>,
}

impl Connection {
    /// Wrap the two halves of a socket.
    #[must_use]
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            _stop: None,
        }
    }

    /// Cancel `token` when this connection is dropped.
    #[must_use]
    pub fn with_stop_token(mut self, token: CancellationToken) -> Self {
        self._stop = Some(token.drop_guard());
        self
    }

    /// Queue a text frame for sending.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` if the I/O side has gone away.
    pub fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    /// Wait for the next socket event. `None` means the socket is gone.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }
}

/// Opens sockets.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a socket to `url`, resolving once it is ready for traffic.
    async fn connect(&self, url: &str) -> Result<Connection, TransportError>;
}
