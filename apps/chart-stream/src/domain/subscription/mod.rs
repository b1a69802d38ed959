//! Subscription Target Types
//!
//! The subscription target is the `(symbol, mode, granularity)` tuple the
//! chart currently wants data for. Exactly one target is active per client;
//! changing it supersedes the previous one.

use std::fmt;

use serde::Serialize;

/// Candle granularities (seconds) accepted by the quote service.
pub const SUPPORTED_GRANULARITIES: &[u32] = &[
    60, 120, 180, 300, 600, 900, 1800, 3600, 7200, 14400, 28800, 86400,
];

/// Default candle granularity (one minute).
pub const DEFAULT_GRANULARITY: u32 = 60;

/// Check whether a candle granularity is accepted by the quote service.
#[must_use]
pub fn is_supported_granularity(seconds: u32) -> bool {
    SUPPORTED_GRANULARITIES.contains(&seconds)
}

/// Data mode for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Continuous live tick updates.
    #[default]
    Tick,
    /// One-shot historical candle snapshot.
    Candle,
}

impl StreamMode {
    /// Parse mode from string, defaulting to tick.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "candle" | "candles" => Self::Candle,
            _ => Self::Tick,
        }
    }

    /// Get the mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::Candle => "candle",
        }
    }
}

/// What the chart wants data for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionTarget {
    /// Instrument symbol, e.g. `R_100`.
    pub symbol: String,
    /// Tick or candle mode.
    pub mode: StreamMode,
    /// Candle bucket size in seconds; ignored in tick mode.
    pub granularity: u32,
}

impl SubscriptionTarget {
    /// Target for live ticks on `symbol`.
    #[must_use]
    pub fn ticks(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            mode: StreamMode::Tick,
            granularity: DEFAULT_GRANULARITY,
        }
    }

    /// Target for candles of `granularity` seconds on `symbol`.
    #[must_use]
    pub fn candles(symbol: impl Into<String>, granularity: u32) -> Self {
        Self {
            symbol: symbol.into(),
            mode: StreamMode::Candle,
            granularity,
        }
    }

    /// Apply an update, returning `true` if the target actually changed.
    pub fn apply(&mut self, update: TargetUpdate) -> bool {
        let before = self.clone();
        match update {
            TargetUpdate::Symbol(symbol) => self.symbol = symbol,
            TargetUpdate::Mode(mode) => self.mode = mode,
            TargetUpdate::Granularity(granularity) => self.granularity = granularity,
            TargetUpdate::Replace(target) => *self = target,
        }
        *self != before
    }
}

impl Default for SubscriptionTarget {
    fn default() -> Self {
        Self::ticks("R_100")
    }
}

impl fmt::Display for SubscriptionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            StreamMode::Tick => write!(f, "{} ticks", self.symbol),
            StreamMode::Candle => write!(f, "{} candles/{}s", self.symbol, self.granularity),
        }
    }
}

/// A change to one field of the target (or the whole target).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetUpdate {
    /// Switch instrument.
    Symbol(String),
    /// Switch between tick and candle mode.
    Mode(StreamMode),
    /// Change candle bucket size.
    Granularity(u32),
    /// Replace every field at once.
    Replace(SubscriptionTarget),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing() {
        assert_eq!(StreamMode::from_str_case_insensitive("tick"), StreamMode::Tick);
        assert_eq!(
            StreamMode::from_str_case_insensitive("CANDLE"),
            StreamMode::Candle
        );
        assert_eq!(
            StreamMode::from_str_case_insensitive("candles"),
            StreamMode::Candle
        );
        assert_eq!(
            StreamMode::from_str_case_insensitive("unknown"),
            StreamMode::Tick
        );
    }

    #[test]
    fn apply_reports_changes() {
        let mut target = SubscriptionTarget::ticks("R_100");

        assert!(!target.apply(TargetUpdate::Symbol("R_100".to_string())));
        assert!(target.apply(TargetUpdate::Mode(StreamMode::Candle)));
        assert!(target.apply(TargetUpdate::Granularity(300)));
        assert_eq!(target, SubscriptionTarget::candles("R_100", 300));

        assert!(target.apply(TargetUpdate::Replace(SubscriptionTarget::ticks("R_50"))));
        assert_eq!(target.symbol, "R_50");
    }

    #[test]
    fn granularity_support() {
        assert!(is_supported_granularity(60));
        assert!(is_supported_granularity(300));
        assert!(!is_supported_granularity(0));
        assert!(!is_supported_granularity(45));
    }

    #[test]
    fn display() {
        assert_eq!(SubscriptionTarget::ticks("R_100").to_string(), "R_100 ticks");
        assert_eq!(
            SubscriptionTarget::candles("R_100", 300).to_string(),
            "R_100 candles/300s"
        );
    }
}
