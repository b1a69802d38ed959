//! Application Services
//!
//! Stock [`EventSink`] adapters for consumers that prefer a stream of
//! events over callbacks.
//!
//! - `ChannelSink`: forwards every callback as a [`StreamEvent`] over mpsc

use tokio::sync::mpsc;

use crate::application::ports::EventSink;
use crate::domain::streaming::{CandleBar, ConnectionState, ErrorEvent, TickUpdate};

/// Events emitted by a streaming client, one per sink callback.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Connection state changed.
    Status {
        /// New state.
        state: ConnectionState,
        /// Optional context for display.
        message: Option<String>,
    },
    /// Live tick.
    Tick(TickUpdate),
    /// Historical candle snapshot.
    Candles(Vec<CandleBar>),
    /// Error notification.
    Error(ErrorEvent),
}

/// Event sink that forwards callbacks into an unbounded channel.
///
/// Events are silently discarded once the receiver is dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelSink {
    /// Create a sink together with the receiving end.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: StreamEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }
}

impl EventSink for ChannelSink {
    fn on_status_change(&self, state: ConnectionState, message: Option<String>) {
        self.forward(StreamEvent::Status { state, message });
    }

    fn on_tick(&self, update: TickUpdate) {
        self.forward(StreamEvent::Tick(update));
    }

    fn on_candles(&self, bars: Vec<CandleBar>) {
        self.forward(StreamEvent::Candles(bars));
    }

    fn on_error(&self, event: ErrorEvent) {
        self.forward(StreamEvent::Error(event));
    }
}
