//! Quote Service Adapters
//!
//! Client for the Deriv-style JSON-over-WebSocket quote service:
//!
//! - **Wire**: message types and the frame decoder
//! - **Session**: token validation and the authorize exchange
//! - **Subscription**: tick/candle requests for the active target
//! - **Connection**: the manager task, failover, keepalive and backoff

pub mod auth;
pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod subscription;
pub mod transport;

pub use auth::{AuthError, AuthSession, AuthStart, AuthState, Credential, validate};
pub use client::{ClientError, ClientStatus, StreamClient, StreamConfig};
pub use codec::{CodecError, MessageDecoder};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use messages::*;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use subscription::SubscriptionController;
pub use transport::TungsteniteConnector;
