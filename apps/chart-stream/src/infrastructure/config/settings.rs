//! Client Configuration Settings
//!
//! Configuration types for the streaming client, loaded from environment
//! variables. Every value has a default; only structural problems (no
//! endpoints, an unsupported granularity) are errors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::subscription::{
    DEFAULT_GRANULARITY, StreamMode, SubscriptionTarget, is_supported_granularity,
};
use crate::infrastructure::deriv::client::{
    DEFAULT_APP_ID, DEFAULT_ENDPOINTS, DEFAULT_FAILOVER_DELAY, DEFAULT_HANDSHAKE_TIMEOUT,
    StreamConfig,
};
use crate::infrastructure::deriv::heartbeat::HeartbeatConfig;
use crate::infrastructure::deriv::reconnect::ReconnectConfig;
use crate::infrastructure::deriv::subscription::DEFAULT_CANDLE_COUNT;

/// Environment file name searched for by [`find_dotenv`].
pub const DOTENV_FILE: &str = ".env";

/// Quote service connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Endpoint base URLs in failover order.
    pub endpoints: Vec<String>,
    /// Application id sent as `app_id`.
    pub app_id: String,
    /// Optional API token.
    pub token: Option<String>,
    /// Initial subscription target.
    pub target: SubscriptionTarget,
    /// Candles per snapshot.
    pub candle_count: u32,
    /// Deadline for each socket to open.
    pub handshake_timeout: Duration,
    /// Pause before trying the next endpoint.
    pub failover_delay: Duration,
    /// Reconnect with backoff after failures.
    pub auto_reconnect: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_ENDPOINTS.iter().map(|e| (*e).to_string()).collect(),
            app_id: DEFAULT_APP_ID.to_string(),
            token: None,
            target: SubscriptionTarget::default(),
            candle_count: DEFAULT_CANDLE_COUNT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            failover_delay: DEFAULT_FAILOVER_DELAY,
            auto_reconnect: false,
        }
    }
}

/// Backoff settings for auto-reconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectSettings {
    /// First retry delay.
    pub delay_initial: Duration,
    /// Delay ceiling.
    pub delay_max: Duration,
    /// Growth factor per attempt.
    pub delay_multiplier: f64,
    /// Attempt budget (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_initial: Duration::from_millis(500),
            delay_max: Duration::from_secs(30),
            delay_multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

/// Transport keepalive settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// Ping interval.
    pub interval: Duration,
    /// Silence before the socket is dropped.
    pub timeout: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Health server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health/metrics HTTP port (0 disables the server).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

impl ServerSettings {
    /// Whether the health server should run.
    #[must_use]
    pub const fn health_enabled(&self) -> bool {
        self.health_port != 0
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClientConfig {
    /// Connection and subscription settings.
    pub stream: StreamSettings,
    /// Auto-reconnect backoff.
    pub reconnect: ReconnectSettings,
    /// Transport keepalive.
    pub heartbeat: HeartbeatSettings,
    /// Health server.
    pub server: ServerSettings,
}

impl ClientConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint list is empty or the granularity is
    /// not one the service supports.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`ClientConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let endpoints = match env.string("QUOTE_STREAM_ENDPOINTS") {
            Some(raw) => {
                let parsed: Vec<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string)
                    .collect();
                if parsed.is_empty() {
                    return Err(ConfigError::EmptyEndpoints);
                }
                parsed
            }
            None => StreamSettings::default().endpoints,
        };

        let symbol = env
            .string("QUOTE_STREAM_SYMBOL")
            .filter(|s| !s.trim().is_empty())
            .map_or_else(|| SubscriptionTarget::default().symbol, |s| s.trim().to_string());
        let mode = env
            .string("QUOTE_STREAM_MODE")
            .map(|s| StreamMode::from_str_case_insensitive(&s))
            .unwrap_or_default();
        let granularity = env.parse("QUOTE_STREAM_GRANULARITY", DEFAULT_GRANULARITY);
        if !is_supported_granularity(granularity) {
            return Err(ConfigError::UnsupportedGranularity(granularity));
        }

        let stream = StreamSettings {
            endpoints,
            app_id: env
                .string("QUOTE_STREAM_APP_ID")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_APP_ID.to_string()),
            token: env
                .string("QUOTE_STREAM_TOKEN")
                .filter(|s| !s.trim().is_empty()),
            target: SubscriptionTarget {
                symbol,
                mode,
                granularity,
            },
            candle_count: env.parse("QUOTE_STREAM_CANDLE_COUNT", DEFAULT_CANDLE_COUNT),
            handshake_timeout: env.secs(
                "QUOTE_STREAM_HANDSHAKE_TIMEOUT_SECS",
                DEFAULT_HANDSHAKE_TIMEOUT,
            ),
            failover_delay: env.millis("QUOTE_STREAM_FAILOVER_DELAY_MS", DEFAULT_FAILOVER_DELAY),
            auto_reconnect: env.flag("QUOTE_STREAM_AUTO_RECONNECT", false),
        };

        let reconnect_defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            delay_initial: env.millis(
                "QUOTE_STREAM_RECONNECT_DELAY_INITIAL_MS",
                reconnect_defaults.delay_initial,
            ),
            delay_max: env.secs(
                "QUOTE_STREAM_RECONNECT_DELAY_MAX_SECS",
                reconnect_defaults.delay_max,
            ),
            delay_multiplier: env.parse(
                "QUOTE_STREAM_RECONNECT_DELAY_MULTIPLIER",
                reconnect_defaults.delay_multiplier,
            ),
            max_attempts: env.parse(
                "QUOTE_STREAM_MAX_RECONNECT_ATTEMPTS",
                reconnect_defaults.max_attempts,
            ),
        };

        let heartbeat_defaults = HeartbeatSettings::default();
        let heartbeat = HeartbeatSettings {
            interval: env.secs(
                "QUOTE_STREAM_HEARTBEAT_INTERVAL_SECS",
                heartbeat_defaults.interval,
            ),
            timeout: env.secs(
                "QUOTE_STREAM_HEARTBEAT_TIMEOUT_SECS",
                heartbeat_defaults.timeout,
            ),
        };

        let server = ServerSettings {
            health_port: env.parse(
                "QUOTE_STREAM_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        Ok(Self {
            stream,
            reconnect,
            heartbeat,
            server,
        })
    }

    /// Client configuration for [`StreamClient::spawn`](crate::StreamClient::spawn).
    #[must_use]
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            endpoints: self.stream.endpoints.clone(),
            app_id: self.stream.app_id.clone(),
            credential: self.stream.token.clone(),
            target: self.stream.target.clone(),
            candle_count: self.stream.candle_count,
            handshake_timeout: self.stream.handshake_timeout,
            failover_delay: self.stream.failover_delay,
            auto_reconnect: self.stream.auto_reconnect,
            reconnect: ReconnectConfig::from_reconnect_settings(&self.reconnect),
        }
    }

    /// Keepalive timing for the transport.
    #[must_use]
    pub const fn heartbeat_config(&self) -> HeartbeatConfig {
        HeartbeatConfig::from_heartbeat_settings(&self.heartbeat)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `QUOTE_STREAM_ENDPOINTS` was set but held no URLs.
    #[error("QUOTE_STREAM_ENDPOINTS must name at least one endpoint")]
    EmptyEndpoints,
    /// Granularity is not in the supported set.
    #[error("unsupported candle granularity: {0}s")]
    UnsupportedGranularity(u32),
}

// =============================================================================
// Environment Helpers
// =============================================================================

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.string(key)
            .map_or(default, |v| match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => default,
            })
    }
}

// =============================================================================
// Dotenv Loading
// =============================================================================

/// Find the nearest `.env` in `start` or one of its ancestors.
#[must_use]
pub fn find_dotenv(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(DOTENV_FILE))
        .find(|candidate| candidate.is_file())
}

/// Load the nearest `.env` relative to the working directory.
///
/// Returns the file that was loaded, if any. Variables already present in the
/// environment win.
pub fn load_dotenv() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let path = find_dotenv(&cwd)?;
    match dotenvy::from_path(&path) {
        Ok(()) => Some(path),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to load .env file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ClientConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.stream.endpoints.len(), 2);
        assert_eq!(config.stream.app_id, "1089");
        assert_eq!(config.stream.target, SubscriptionTarget::ticks("R_100"));
        assert!(!config.stream.auto_reconnect);
        assert_eq!(config.server.health_port, 8083);
    }

    #[test]
    fn reads_stream_settings() {
        let config = config_from(&[
            ("QUOTE_STREAM_ENDPOINTS", "wss://a.example/ws, wss://b.example/ws"),
            ("QUOTE_STREAM_APP_ID", "4242"),
            ("QUOTE_STREAM_TOKEN", "a1b2c3d4e5f6"),
            ("QUOTE_STREAM_SYMBOL", "frxEURUSD"),
            ("QUOTE_STREAM_MODE", "candle"),
            ("QUOTE_STREAM_GRANULARITY", "300"),
            ("QUOTE_STREAM_CANDLE_COUNT", "50"),
            ("QUOTE_STREAM_HANDSHAKE_TIMEOUT_SECS", "3"),
            ("QUOTE_STREAM_FAILOVER_DELAY_MS", "250"),
            ("QUOTE_STREAM_AUTO_RECONNECT", "true"),
        ])
        .unwrap();

        assert_eq!(
            config.stream.endpoints,
            vec!["wss://a.example/ws", "wss://b.example/ws"]
        );
        assert_eq!(config.stream.app_id, "4242");
        assert_eq!(config.stream.token.as_deref(), Some("a1b2c3d4e5f6"));
        assert_eq!(
            config.stream.target,
            SubscriptionTarget::candles("frxEURUSD", 300)
        );
        assert_eq!(config.stream.candle_count, 50);
        assert_eq!(config.stream.handshake_timeout, Duration::from_secs(3));
        assert_eq!(config.stream.failover_delay, Duration::from_millis(250));
        assert!(config.stream.auto_reconnect);
    }

    #[test]
    fn reads_backoff_and_keepalive() {
        let config = config_from(&[
            ("QUOTE_STREAM_RECONNECT_DELAY_INITIAL_MS", "100"),
            ("QUOTE_STREAM_RECONNECT_DELAY_MAX_SECS", "5"),
            ("QUOTE_STREAM_RECONNECT_DELAY_MULTIPLIER", "1.5"),
            ("QUOTE_STREAM_MAX_RECONNECT_ATTEMPTS", "0"),
            ("QUOTE_STREAM_HEARTBEAT_INTERVAL_SECS", "10"),
            ("QUOTE_STREAM_HEARTBEAT_TIMEOUT_SECS", "20"),
            ("QUOTE_STREAM_HEALTH_PORT", "0"),
        ])
        .unwrap();

        assert_eq!(config.reconnect.delay_initial, Duration::from_millis(100));
        assert_eq!(config.reconnect.delay_max, Duration::from_secs(5));
        assert!((config.reconnect.delay_multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.reconnect.max_attempts, 0);
        assert_eq!(config.heartbeat.interval, Duration::from_secs(10));
        assert_eq!(config.heartbeat.timeout, Duration::from_secs(20));
        assert!(!config.server.health_enabled());
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let config = config_from(&[
            ("QUOTE_STREAM_CANDLE_COUNT", "lots"),
            ("QUOTE_STREAM_HANDSHAKE_TIMEOUT_SECS", "-1"),
            ("QUOTE_STREAM_GRANULARITY", "sixty"),
            ("QUOTE_STREAM_HEALTH_PORT", "99999"),
        ])
        .unwrap();

        assert_eq!(config.stream.candle_count, DEFAULT_CANDLE_COUNT);
        assert_eq!(config.stream.handshake_timeout, DEFAULT_HANDSHAKE_TIMEOUT);
        assert_eq!(config.stream.target.granularity, DEFAULT_GRANULARITY);
        assert_eq!(config.server.health_port, 8083);
    }

    #[test_case(""; "empty")]
    #[test_case(" , ,"; "only separators")]
    fn empty_endpoint_list_is_an_error(raw: &str) {
        assert_eq!(
            config_from(&[("QUOTE_STREAM_ENDPOINTS", raw)]),
            Err(ConfigError::EmptyEndpoints)
        );
    }

    #[test_case("7"; "seven seconds")]
    #[test_case("90"; "ninety seconds")]
    fn unsupported_granularity_is_an_error(raw: &str) {
        let expected: u32 = raw.parse().unwrap();
        assert_eq!(
            config_from(&[("QUOTE_STREAM_GRANULARITY", raw)]),
            Err(ConfigError::UnsupportedGranularity(expected))
        );
    }

    #[test_case("1", true)]
    #[test_case("TRUE", true)]
    #[test_case("off", false)]
    #[test_case("maybe", false)]
    fn auto_reconnect_flag(raw: &str, expected: bool) {
        let config = config_from(&[("QUOTE_STREAM_AUTO_RECONNECT", raw)]).unwrap();
        assert_eq!(config.stream.auto_reconnect, expected);
    }

    #[test]
    fn blank_token_is_none() {
        let config = config_from(&[("QUOTE_STREAM_TOKEN", "   ")]).unwrap();
        assert_eq!(config.stream.token, None);
    }

    #[test]
    fn stream_config_carries_settings() {
        let config = config_from(&[
            ("QUOTE_STREAM_TOKEN", "a1b2c3d4e5f6"),
            ("QUOTE_STREAM_AUTO_RECONNECT", "yes"),
            ("QUOTE_STREAM_MAX_RECONNECT_ATTEMPTS", "9"),
        ])
        .unwrap();

        let stream = config.stream_config();
        assert_eq!(stream.credential.as_deref(), Some("a1b2c3d4e5f6"));
        assert!(stream.auto_reconnect);
        assert_eq!(stream.reconnect.max_attempts, 9);
        assert_eq!(
            stream.endpoint_url(0).as_deref(),
            Some("wss://ws.derivws.com/websockets/v3?app_id=1089")
        );

        let heartbeat = config.heartbeat_config();
        assert_eq!(heartbeat.ping_interval, Duration::from_secs(30));
    }

    #[test]
    fn finds_dotenv_in_ancestor() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("apps").join("chart-stream");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            root.path().join(DOTENV_FILE),
            "QUOTE_STREAM_SYMBOL=1HZ100V\nQUOTE_STREAM_MODE=candle\nQUOTE_STREAM_GRANULARITY=900\n",
        )
        .unwrap();

        let found = find_dotenv(&nested).unwrap();
        assert_eq!(found, root.path().join(DOTENV_FILE));

        let vars: HashMap<String, String> = dotenvy::from_path_iter(&found)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        let config = ClientConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
        assert_eq!(
            config.stream.target,
            SubscriptionTarget::candles("1HZ100V", 900)
        );
    }

    #[test]
    fn no_dotenv_found() {
        let root = tempfile::tempdir().unwrap();
        let found = find_dotenv(root.path());
        // An ancestor of the temp dir could carry one; only assert when none does.
        if let Some(path) = found {
            assert!(!path.starts_with(root.path()));
        }
    }
}
