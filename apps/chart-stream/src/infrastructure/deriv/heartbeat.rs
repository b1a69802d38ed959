//! Transport Keepalive
//!
//! Sends WebSocket-level Ping frames on an interval and flags the socket as
//! dead when no Pong (or any other inbound traffic) arrives within the
//! timeout. This sits below the JSON `{"ping"}`/`{"pong"}` heartbeat, which
//! the connection manager answers itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::HeartbeatSettings;

/// Keepalive timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between Ping frames.
    pub ping_interval: Duration,
    /// Silence after which the socket is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Build from environment-backed settings.
    #[must_use]
    pub const fn from_heartbeat_settings(settings: &HeartbeatSettings) -> Self {
        Self {
            ping_interval: settings.interval,
            pong_timeout: settings.timeout,
        }
    }
}

/// Events emitted by the keepalive task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a Ping frame now.
    SendPing,
    /// Nothing heard back in time; drop the socket.
    Timeout,
}

/// Liveness bookkeeping shared with the socket task.
#[derive(Debug)]
pub struct HeartbeatState {
    last_seen: RwLock<Instant>,
    awaiting_pong: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create state for a fresh socket.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_seen: RwLock::new(Instant::now()),
            awaiting_pong: AtomicBool::new(false),
        }
    }

    /// Record inbound traffic (a Pong or any data frame).
    pub fn record_activity(&self) {
        *self.last_seen.write() = Instant::now();
        self.awaiting_pong.store(false, Ordering::SeqCst);
    }

    /// Record that a Ping went out.
    pub fn mark_ping_sent(&self) {
        self.awaiting_pong.store(true, Ordering::SeqCst);
    }

    /// Whether a Ping is still unanswered.
    #[must_use]
    pub fn is_awaiting_pong(&self) -> bool {
        self.awaiting_pong.load(Ordering::SeqCst)
    }

    /// Time since the last inbound traffic.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_seen.read().elapsed()
    }
}

/// Keepalive loop for one socket.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new keepalive loop.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the receiver goes away, or a timeout fires.
    pub async fn run(self) {
        let period = self.config.ping_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::trace!("Keepalive cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if !self.tick().await {
                        break;
                    }
                }
            }
        }
    }

    /// One interval step. Returns `false` when the loop should stop.
    async fn tick(&self) -> bool {
        if self.state.is_awaiting_pong() {
            let silence = self.state.silence();
            if silence > self.config.pong_timeout {
                tracing::warn!(
                    silence_secs = silence.as_secs(),
                    timeout_secs = self.config.pong_timeout.as_secs(),
                    "Keepalive timeout"
                );
                let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
                return false;
            }
        }

        self.event_tx.send(HeartbeatEvent::SendPing).await.is_ok()
    }
}
