//! Configuration Module
//!
//! Environment-driven settings for the client, keepalive, backoff and the
//! health server, plus `.env` discovery.

mod settings;

pub use settings::{
    ClientConfig, ConfigError, DOTENV_FILE, HeartbeatSettings, ReconnectSettings, ServerSettings,
    StreamSettings, find_dotenv, load_dotenv,
};
