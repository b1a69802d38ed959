#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Chart Stream - Real-time Quote Streaming Client
//!
//! Keeps one WebSocket connection to a Deriv-style quote service on behalf
//! of a trading chart: authorizes with an optional token, subscribes to live
//! ticks or requests candle history for the chart's target, and fails over
//! between endpoints when a handshake stalls.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core streaming types
//!   - `streaming`: Ticks, candles, connection states, error events
//!   - `subscription`: The chart's symbol/mode/granularity target
//!
//! - **Application**: Port definitions
//!   - `ports`: Socket connector and event sink interfaces
//!   - `services`: Channel-backed event sink
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `deriv`: Wire codec, session, subscriptions, connection manager
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//! chart ──commands──► StreamClient ──mpsc──► ConnectionManager ◄──► Connector (WebSocket)
//!   ▲                                              │
//!   └────────────── EventSink callbacks ◄──────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Port definitions and consumer adapters.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{CandleBar, ConnectionState, ErrorEvent, ErrorKind, TickUpdate};
pub use domain::subscription::{
    DEFAULT_GRANULARITY, SUPPORTED_GRANULARITIES, StreamMode, SubscriptionTarget, TargetUpdate,
    is_supported_granularity,
};

// Ports and sinks
pub use application::ports::{Connection, Connector, EventSink, TransportError, TransportEvent};
pub use application::services::{ChannelSink, StreamEvent};

// Quote service client
pub use infrastructure::deriv::{
    AuthError, ClientError, ClientStatus, MessageDecoder, ReconnectConfig, StreamClient,
    StreamConfig, TungsteniteConnector,
};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError, ServerSettings};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
