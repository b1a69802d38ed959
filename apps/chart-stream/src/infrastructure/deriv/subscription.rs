//! Subscription Controller
//!
//! Owns the active [`SubscriptionTarget`] and turns it into wire requests.
//!
//! - Tick mode: `{"ticks": <symbol>, "subscribe": 1, "req_id": 2}`
//! - Candle mode: `{"ticks_history": <symbol>, "style": "candles", ...}`
//!
//! The target outlives sockets: after every (re)connect the manager asks for
//! [`SubscriptionController::subscribe`] again, so the view configuration is
//! never reset to defaults.
//!
//! When the target changes on a live socket the old push stream is cancelled
//! before the new request: by id when the server has told us one, otherwise
//! with `forget_all` for ticks. Ids that were forgotten stay known for the
//! life of the socket, so ticks still in flight from the old stream are
//! recognised and dropped instead of reviving it.

use std::collections::HashSet;

use super::messages::{
    ForgetAllRequest, ForgetRequest, OutboundMessage, TicksHistoryRequest, TicksRequest,
};
use crate::domain::subscription::{StreamMode, SubscriptionTarget, TargetUpdate};

/// Default number of candles requested per snapshot.
pub const DEFAULT_CANDLE_COUNT: u32 = 1000;

/// Holds the desired subscription and what the live socket is streaming.
#[derive(Debug, Clone)]
pub struct SubscriptionController {
    target: SubscriptionTarget,
    candle_count: u32,
    /// Target of the last request sent on the live socket.
    subscribed: Option<SubscriptionTarget>,
    active_id: Option<String>,
    forgotten: HashSet<String>,
}

impl SubscriptionController {
    /// Create a controller for `target`.
    #[must_use]
    pub fn new(target: SubscriptionTarget, candle_count: u32) -> Self {
        Self {
            target,
            candle_count,
            subscribed: None,
            active_id: None,
            forgotten: HashSet::new(),
        }
    }

    /// Get the current target.
    #[must_use]
    pub const fn target(&self) -> &SubscriptionTarget {
        &self.target
    }

    /// Request for the current target.
    #[must_use]
    pub fn request(&self) -> OutboundMessage {
        self.request_for(&self.target)
    }

    fn request_for(&self, target: &SubscriptionTarget) -> OutboundMessage {
        match target.mode {
            StreamMode::Tick => OutboundMessage::Ticks(TicksRequest::new(&target.symbol)),
            StreamMode::Candle => OutboundMessage::TicksHistory(TicksHistoryRequest::candles(
                &target.symbol,
                target.granularity,
                self.candle_count,
            )),
        }
    }

    /// Request for the current target on a fresh socket.
    pub fn subscribe(&mut self) -> OutboundMessage {
        self.subscribed = Some(self.target.clone());
        self.request()
    }

    /// Apply a target change. Returns `true` if the target changed.
    pub fn update(&mut self, update: TargetUpdate) -> bool {
        self.target.apply(update)
    }

    /// Frames that move the live socket onto the current target: a cancel
    /// for the old stream followed by the new request. Empty when the wire
    /// request would not change, e.g. a granularity change in tick mode.
    pub fn retarget_frames(&mut self) -> Vec<OutboundMessage> {
        let request = self.request();
        if let Some(subscribed) = self.subscribed.as_ref()
            && self.request_for(subscribed) == request
        {
            return Vec::new();
        }

        let mut frames = Vec::with_capacity(2);
        if let Some(id) = self.active_id.take() {
            frames.push(OutboundMessage::Forget(ForgetRequest::new(id.clone())));
            self.forgotten.insert(id);
        } else if self
            .subscribed
            .as_ref()
            .is_some_and(|t| t.mode == StreamMode::Tick)
        {
            frames.push(OutboundMessage::ForgetAll(ForgetAllRequest::ticks()));
        }

        self.subscribed = Some(self.target.clone());
        frames.push(request);
        frames
    }

    /// Whether a tick belongs to the current target. Ticks from forgotten
    /// streams, for another symbol, or arriving in candle mode do not.
    #[must_use]
    pub fn accepts_tick(&self, symbol: Option<&str>, subscription_id: Option<&str>) -> bool {
        if self.target.mode != StreamMode::Tick {
            return false;
        }
        if symbol.is_some_and(|s| s != self.target.symbol) {
            return false;
        }
        !subscription_id.is_some_and(|id| self.forgotten.contains(id))
    }

    /// Record the id the server assigned to the current subscription. Ids
    /// already forgotten are ignored.
    pub fn acknowledge(&mut self, id: impl Into<String>) {
        let id = id.into();
        if self.forgotten.contains(&id) {
            tracing::debug!(subscription_id = %id, "Ignoring id of forgotten subscription");
            return;
        }
        if self.active_id.as_deref() != Some(id.as_str()) {
            tracing::debug!(subscription_id = %id, target = %self.target, "Subscription acknowledged");
            self.active_id = Some(id);
        }
    }

    /// Forget everything tied to the socket after it goes away. The target
    /// is kept.
    pub fn reset(&mut self) {
        self.subscribed = None;
        self.active_id = None;
        self.forgotten.clear();
    }
}

impl Default for SubscriptionController {
    fn default() -> Self {
        Self::new(SubscriptionTarget::default(), DEFAULT_CANDLE_COUNT)
    }
}
