//! Quote Service WebSocket Message Types
//!
//! Wire format types for the Deriv-style JSON API. Requests are flat JSON
//! objects tagged with a `req_id`; responses and pushes are discriminated by
//! their top-level key (`tick`, `candles`, `error`, ...).
//!
//! # Outbound
//! - `authorize`: `{"authorize": "<token>", "req_id": 1}`
//! - `ticks`: `{"ticks": "R_100", "subscribe": 1, "req_id": 2}`
//! - `ticks_history`: `{"ticks_history": "R_100", "style": "candles", ...}`
//! - `forget`: `{"forget": "<subscription id>", "req_id": 4}`
//! - `forget_all`: `{"forget_all": "ticks", "req_id": 5}`
//! - `pong`: `{"pong": <token from ping>}`
//!
//! # Inbound
//! - `{"authorize": {...}}`, `{"error": {"code", "message"}}`,
//!   `{"tick": {"epoch", "quote"}}`, `{"candles": [...]}`,
//!   `{"subscription": {"id"}}`, `{"ping": <token>}`, `{"forget": 1}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::streaming::{CandleBar, TickUpdate};

// =============================================================================
// Request Ids
// =============================================================================

/// Request id tagged on authorize requests.
pub const AUTHORIZE_REQ_ID: u32 = 1;

/// Request id tagged on tick subscriptions.
pub const TICKS_REQ_ID: u32 = 2;

/// Request id tagged on candle history requests.
pub const TICKS_HISTORY_REQ_ID: u32 = 3;

/// Request id tagged on forget requests.
pub const FORGET_REQ_ID: u32 = 4;

/// Request id tagged on forget-all requests.
pub const FORGET_ALL_REQ_ID: u32 = 5;

/// Server error code for a rejected token.
pub const INVALID_TOKEN_CODE: &str = "InvalidToken";

/// Server error code for data that needs an authorized session.
pub const AUTHORIZATION_REQUIRED_CODE: &str = "AuthorizationRequired";

// =============================================================================
// Outbound Messages
// =============================================================================

/// Authorization request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizeRequest {
    /// API token.
    pub authorize: String,
    /// Request id.
    pub req_id: u32,
}

impl AuthorizeRequest {
    /// Create an authorize request for `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            authorize: token.into(),
            req_id: AUTHORIZE_REQ_ID,
        }
    }
}

/// Continuous tick subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicksRequest {
    /// Symbol to stream.
    pub ticks: String,
    /// Always 1: keep pushing updates.
    pub subscribe: u8,
    /// Request id.
    pub req_id: u32,
}

impl TicksRequest {
    /// Create a tick subscription for `symbol`.
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            ticks: symbol.into(),
            subscribe: 1,
            req_id: TICKS_REQ_ID,
        }
    }
}

/// One-shot candle history request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicksHistoryRequest {
    /// Symbol to fetch.
    pub ticks_history: String,
    /// Always "candles".
    pub style: String,
    /// Bucket size in seconds.
    pub granularity: u32,
    /// Number of bars.
    pub count: u32,
    /// Always "latest".
    pub end: String,
    /// Request id.
    pub req_id: u32,
}

impl TicksHistoryRequest {
    /// Create a candle history request ending at the latest bar.
    #[must_use]
    pub fn candles(symbol: impl Into<String>, granularity: u32, count: u32) -> Self {
        Self {
            ticks_history: symbol.into(),
            style: "candles".to_string(),
            granularity,
            count,
            end: "latest".to_string(),
            req_id: TICKS_HISTORY_REQ_ID,
        }
    }
}

/// Cancel a push subscription by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForgetRequest {
    /// Subscription id from the server's acknowledgment.
    pub forget: String,
    /// Request id.
    pub req_id: u32,
}

impl ForgetRequest {
    /// Create a forget request for `subscription_id`.
    #[must_use]
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            forget: subscription_id.into(),
            req_id: FORGET_REQ_ID,
        }
    }
}

/// Cancel every push stream of one type, for streams whose id never arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForgetAllRequest {
    /// Stream type, e.g. `ticks`.
    pub forget_all: String,
    /// Request id.
    pub req_id: u32,
}

impl ForgetAllRequest {
    /// Cancel every tick stream on the socket.
    #[must_use]
    pub fn ticks() -> Self {
        Self {
            forget_all: "ticks".to_string(),
            req_id: FORGET_ALL_REQ_ID,
        }
    }
}

/// Heartbeat reply echoing the server's ping token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PongReply {
    /// Token exactly as received.
    pub pong: Value,
}

/// Every message the client sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    /// `authorize`
    Authorize(AuthorizeRequest),
    /// `ticks`
    Ticks(TicksRequest),
    /// `ticks_history`
    TicksHistory(TicksHistoryRequest),
    /// `forget`
    Forget(ForgetRequest),
    /// `forget_all`
    ForgetAll(ForgetAllRequest),
    /// `pong`
    Pong(PongReply),
}

impl OutboundMessage {
    /// Heartbeat reply for a ping carrying `token`.
    #[must_use]
    pub const fn pong(token: Value) -> Self {
        Self::Pong(PongReply { pong: token })
    }

    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Authorize(_) => "authorize",
            Self::Ticks(_) => "ticks",
            Self::TicksHistory(_) => "ticks_history",
            Self::Forget(_) => "forget",
            Self::ForgetAll(_) => "forget_all",
            Self::Pong(_) => "pong",
        }
    }

    /// Serialize the message to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (should not happen with valid data).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Inbound Wire Bodies
// =============================================================================

/// A price that may arrive as a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireNumber {
    /// `101.23`
    Number(f64),
    /// `"101.23"`
    Text(String),
}

impl WireNumber {
    /// Numeric value, if the text form parses.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// `error` body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorBody {
    /// Server error code, e.g. `InvalidToken`.
    #[serde(default)]
    pub code: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

/// `authorize` body. Only the fields worth logging are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuthorizeBody {
    /// Account login id.
    #[serde(default)]
    pub loginid: Option<String>,
    /// Account currency.
    #[serde(default)]
    pub currency: Option<String>,
}

/// `tick` body.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TickBody {
    /// Epoch seconds.
    pub epoch: i64,
    /// Price.
    pub quote: WireNumber,
    /// Symbol, when echoed.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Subscription id, when embedded.
    #[serde(default)]
    pub id: Option<String>,
}

/// One element of `candles`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CandleBody {
    /// Bucket open time.
    pub epoch: i64,
    /// Opening price.
    pub open: WireNumber,
    /// Highest price.
    pub high: WireNumber,
    /// Lowest price.
    pub low: WireNumber,
    /// Closing price.
    pub close: WireNumber,
}

/// `subscription` body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionBody {
    /// Server-assigned subscription id.
    pub id: String,
}

// =============================================================================
// Decoded Messages
// =============================================================================

/// Summary of a successful authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizeInfo {
    /// Account login id.
    pub loginid: Option<String>,
    /// Account currency.
    pub currency: Option<String>,
}

impl From<AuthorizeBody> for AuthorizeInfo {
    fn from(body: AuthorizeBody) -> Self {
        Self {
            loginid: body.loginid,
            currency: body.currency,
        }
    }
}

/// An error response from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Server error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Request id of the failed request, if echoed.
    pub req_id: Option<u64>,
}

impl ServerError {
    /// Check if the server rejected the token.
    #[must_use]
    pub fn is_invalid_token(&self) -> bool {
        self.code == INVALID_TOKEN_CODE
    }

    /// Check if the request needs an authorized session.
    #[must_use]
    pub fn is_authorization_required(&self) -> bool {
        self.code == AUTHORIZATION_REQUIRED_CODE
    }

    /// Check if this error answers the authorize request.
    #[must_use]
    pub fn is_authorize_response(&self) -> bool {
        self.req_id == Some(u64::from(AUTHORIZE_REQ_ID))
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// The token was accepted.
    AuthResult(AuthorizeInfo),
    /// Live price update.
    Tick {
        /// The tick.
        update: TickUpdate,
        /// Symbol the tick is for, when echoed.
        symbol: Option<String>,
        /// Subscription id the tick belongs to, if embedded.
        subscription_id: Option<String>,
    },
    /// Historical snapshot, oldest first.
    CandleSnapshot(Vec<CandleBar>),
    /// Bare subscription acknowledgment.
    SubscriptionAck {
        /// Server-assigned subscription id.
        id: String,
    },
    /// Heartbeat that must be answered with the same token.
    HeartbeatPing {
        /// Token to echo.
        token: Value,
    },
    /// Response to a forget request.
    ForgetResult {
        /// Whether a subscription was cancelled.
        forgotten: bool,
    },
    /// Error response.
    ServerError(ServerError),
    /// Frame that could not be decoded. Never fatal.
    ProtocolError(String),
}

impl InboundMessage {
    /// Short name for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AuthResult(_) => "authorize",
            Self::Tick { .. } => "tick",
            Self::CandleSnapshot(_) => "candles",
            Self::SubscriptionAck { .. } => "subscription",
            Self::HeartbeatPing { .. } => "ping",
            Self::ForgetResult { .. } => "forget",
            Self::ServerError(_) => "error",
            Self::ProtocolError(_) => "protocol_error",
        }
    }
}
