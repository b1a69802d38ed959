//! Auto-Reconnect Backoff
//!
//! Exponential backoff with jitter for the opt-in auto-reconnect. The client
//! never reconnects on its own unless `StreamConfig::auto_reconnect` is set;
//! when it is, each failed socket schedules one attempt after
//! [`ReconnectPolicy::next_delay`], until the attempt budget runs out.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::ReconnectSettings;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempt budget (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Build from environment-backed settings.
    #[must_use]
    pub const fn from_reconnect_settings(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: settings.delay_initial,
            max_delay: settings.delay_max,
            multiplier: settings.delay_multiplier,
            jitter_factor: 0.1,
            max_attempts: settings.max_attempts,
        }
    }

    /// Same parameters without jitter, for deterministic timing.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }
}

/// Backoff state for one client.
///
/// # Example
///
/// ```rust
/// use chart_stream::infrastructure::deriv::reconnect::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
/// assert!(policy.next_delay().is_some());
///
/// // A socket opened
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    base_delay: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Create a policy at its first attempt.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let base_delay = config.initial_delay;
        Self {
            config,
            base_delay,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempts += 1;

        let delay = self.jittered(self.base_delay);
        self.base_delay = self.grown(self.base_delay);
        Some(delay)
    }

    /// Start over after a successful open.
    pub const fn reset(&mut self) {
        self.base_delay = self.config.initial_delay;
        self.attempts = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempts
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempts < self.config.max_attempts
    }

    fn grown(&self, delay: Duration) -> Duration {
        let factor = self.config.multiplier;
        if !factor.is_finite() || factor <= 0.0 {
            return self.config.max_delay.min(delay);
        }
        let secs = delay.as_secs_f64() * factor;
        if secs >= self.config.max_delay.as_secs_f64() {
            self.config.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let fraction = self.config.jitter_factor;
        if fraction <= 0.0 {
            return delay;
        }
        let secs = delay.as_secs_f64();
        let spread = secs * fraction;
        let offset: f64 = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((secs + offset).max(0.001))
    }
}
