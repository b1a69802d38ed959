//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the port interfaces that define how the streaming
//! client talks to sockets and to its consumer, plus the stock consumer
//! adapters.

/// Port interfaces for external systems (socket connector, event sink).
pub mod ports;

/// Event sink adapters (channel forwarding).
pub mod services;
