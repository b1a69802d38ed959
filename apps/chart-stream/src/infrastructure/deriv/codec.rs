//! Quote Stream Codec
//!
//! Decodes inbound quote-service frames into [`InboundMessage`]. Outbound
//! requests serialize themselves through
//! [`OutboundMessage::to_json`](super::messages::OutboundMessage::to_json).
//!
//! Frames are single JSON objects discriminated by their top-level key. Keys
//! are checked in a fixed order (`error`, `ping`, `authorize`, `tick`,
//! `candles`, `subscription`, `forget`) so a tick frame that also carries a
//! `subscription` object is still a tick.
//!
//! Decoding never fails from the caller's point of view: anything that cannot
//! be understood becomes [`InboundMessage::ProtocolError`].

use serde_json::{Map, Value};

use super::messages::{
    AuthorizeBody, CandleBody, ErrorBody, InboundMessage, ServerError, SubscriptionBody, TickBody,
};
use crate::domain::streaming::{CandleBar, TickUpdate};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// No recognized top-level key.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// A numeric field did not hold a number.
    #[error("invalid number in {field}")]
    InvalidNumber {
        /// Field name.
        field: &'static str,
    },

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the quote stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageDecoder;

impl MessageDecoder {
    /// Create a new decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame. Failures become [`InboundMessage::ProtocolError`].
    #[must_use]
    pub fn decode(&self, text: &str) -> InboundMessage {
        match self.try_decode(text) {
            Ok(message) => message,
            Err(e) => InboundMessage::ProtocolError(e.to_string()),
        }
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object, has no recognized
    /// key, or a recognized body is malformed.
    pub fn try_decode(&self, text: &str) -> Result<InboundMessage, CodecError> {
        let value: Value = serde_json::from_str(text.trim())?;
        let Value::Object(mut map) = value else {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                preview(text)
            )));
        };

        if let Some(body) = map.remove("error") {
            let body: ErrorBody = serde_json::from_value(body)?;
            return Ok(InboundMessage::ServerError(ServerError {
                code: body.code,
                message: body.message,
                req_id: map.get("req_id").and_then(Value::as_u64),
            }));
        }

        if let Some(token) = map.remove("ping") {
            return Ok(InboundMessage::HeartbeatPing { token });
        }

        if let Some(body) = map.remove("authorize") {
            let body: AuthorizeBody = serde_json::from_value(body)?;
            return Ok(InboundMessage::AuthResult(body.into()));
        }

        if let Some(body) = map.remove("tick") {
            let body: TickBody = serde_json::from_value(body)?;
            let price = body
                .quote
                .value()
                .ok_or(CodecError::InvalidNumber { field: "quote" })?;
            let subscription_id = subscription_id(&map).or(body.id);
            return Ok(InboundMessage::Tick {
                update: TickUpdate::new(body.epoch, price),
                symbol: body.symbol,
                subscription_id,
            });
        }

        if let Some(body) = map.remove("candles") {
            let bodies: Vec<CandleBody> = serde_json::from_value(body)?;
            return Ok(InboundMessage::CandleSnapshot(decode_candles(bodies)?));
        }

        if let Some(body) = map.remove("subscription") {
            let body: SubscriptionBody = serde_json::from_value(body)?;
            return Ok(InboundMessage::SubscriptionAck { id: body.id });
        }

        if let Some(result) = map.remove("forget") {
            let forgotten = match result {
                Value::Bool(b) => b,
                Value::Number(n) => n.as_u64().unwrap_or(0) > 0,
                _ => false,
            };
            return Ok(InboundMessage::ForgetResult { forgotten });
        }

        let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
        keys.sort_unstable();
        Err(CodecError::UnknownMessageType(if keys.is_empty() {
            "<empty object>".to_string()
        } else {
            keys.join(",")
        }))
    }
}

fn subscription_id(map: &Map<String, Value>) -> Option<String> {
    map.get("subscription")
        .and_then(|s| s.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn decode_candles(bodies: Vec<CandleBody>) -> Result<Vec<CandleBar>, CodecError> {
    let mut bars = bodies
        .into_iter()
        .map(|c| {
            Ok(CandleBar {
                epoch: c.epoch,
                open: c.open.value().ok_or(CodecError::InvalidNumber { field: "open" })?,
                high: c.high.value().ok_or(CodecError::InvalidNumber { field: "high" })?,
                low: c.low.value().ok_or(CodecError::InvalidNumber { field: "low" })?,
                close: c
                    .close
                    .value()
                    .ok_or(CodecError::InvalidNumber { field: "close" })?,
            })
        })
        .collect::<Result<Vec<_>, CodecError>>()?;
    bars.sort_by_key(|bar| bar.epoch);
    Ok(bars)
}

fn preview(text: &str) -> String {
    text.trim().chars().take(50).collect()
}
