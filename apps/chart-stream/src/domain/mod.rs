//! Domain Layer - Core streaming types and business rules.
//!
//! This layer contains the types the chart surface consumes and the
//! subscription target it configures. Nothing here performs I/O.

/// Market data and connection status types (ticks, candles, errors).
pub mod streaming;

/// Subscription target (symbol, mode, granularity).
pub mod subscription;
