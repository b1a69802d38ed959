//! Market Data Streaming Types
//!
//! Core domain types delivered to the chart surface: connection status,
//! live ticks, historical candles and error notifications. These types are
//! wire-agnostic and represent the canonical internal representation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of a streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket, no attempt in flight.
    #[default]
    Disconnected,
    /// Handshake in progress (including failover delays).
    Connecting,
    /// Socket open; market data may flow.
    Connected,
    /// Terminal failure until an explicit reconnect.
    Error,
}

impl ConnectionState {
    /// Get the lowercase status string shown by the chart.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }

    /// Check if market data may be delivered in this state.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Numeric encoding used by the connection state gauge.
    #[must_use]
    pub const fn as_gauge(&self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Error => 3.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Market Data
// =============================================================================

/// A single live price update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TickUpdate {
    /// Server epoch in seconds.
    pub epoch: i64,
    /// Quoted price.
    pub price: f64,
}

impl TickUpdate {
    /// Create a new tick.
    #[must_use]
    pub const fn new(epoch: i64, price: f64) -> Self {
        Self { epoch, price }
    }

    /// Tick time as a UTC timestamp, if the epoch is representable.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.epoch, 0)
    }
}

/// One OHLC bucket of a historical candle snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CandleBar {
    /// Bucket open time, epoch seconds.
    pub epoch: i64,
    /// Opening price.
    pub open: f64,
    /// Highest price.
    pub high: f64,
    /// Lowest price.
    pub low: f64,
    /// Closing price.
    pub close: f64,
}

impl CandleBar {
    /// Bucket open time as a UTC timestamp, if the epoch is representable.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.epoch, 0)
    }
}

// =============================================================================
// Errors surfaced to the consumer
// =============================================================================

/// Error taxonomy for events delivered to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Socket-level failure or unreachable endpoint.
    Connection,
    /// Handshake deadline exceeded on every endpoint.
    Timeout,
    /// Credential rejected or required.
    Auth,
    /// Malformed or unrecognized frame.
    Protocol,
    /// Error response from the server outside of authorization.
    Server,
}

impl ErrorKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Auth => "auth",
            Self::Protocol => "protocol",
            Self::Server => "server",
        }
    }
}

/// An error notification, consumed once by the event sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEvent {
    /// Machine-readable code (server code or a local one).
    pub code: String,
    /// Human-readable message for display.
    pub message: String,
    /// Whether the connection is unusable until the caller acts.
    pub fatal: bool,
    /// Taxonomy class.
    pub kind: ErrorKind,
}

impl ErrorEvent {
    /// Create a new error event.
    #[must_use]
    pub fn new(
        kind: ErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
        fatal: bool,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            fatal,
            kind,
        }
    }

    /// Non-fatal protocol error for a frame that could not be decoded.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, "ProtocolError", message, false)
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}
