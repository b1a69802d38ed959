//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the ambient
//! services the binary runs alongside the client.

/// Deriv-style quote service client (wire codec, session, connection manager).
pub mod deriv;

/// Environment configuration and `.env` loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
