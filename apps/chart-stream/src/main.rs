//! Chart Stream Binary
//!
//! Runs one streaming client against the configured quote service and logs
//! every event it delivers.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin chart-stream
//! ```
//!
//! # Environment Variables
//!
//! - `QUOTE_STREAM_ENDPOINTS`: Comma-separated endpoint URLs
//! - `QUOTE_STREAM_APP_ID`: Application id (default: 1089)
//! - `QUOTE_STREAM_TOKEN`: Optional API token
//! - `QUOTE_STREAM_SYMBOL` / `QUOTE_STREAM_MODE` / `QUOTE_STREAM_GRANULARITY`: Initial target
//! - `QUOTE_STREAM_AUTO_RECONNECT`: Reconnect with backoff (default: false)
//! - `QUOTE_STREAM_HEALTH_PORT`: Health check HTTP port (default: 8083, 0 disables)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use chart_stream::infrastructure::config::load_dotenv;
use chart_stream::infrastructure::health::{HealthServer, HealthServerState};
use chart_stream::infrastructure::telemetry;
use chart_stream::{
    ChannelSink, ClientConfig, StreamClient, StreamEvent, TungsteniteConnector, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        return Err("rustls crypto provider was already installed".into());
    }

    let dotenv_path = load_dotenv();

    // Initialize telemetry (tracing + optional OTLP export)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Chart Stream");
    if let Some(path) = dotenv_path {
        tracing::debug!(path = %path.display(), "Loaded .env file");
    }

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = ClientConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let (sink, events) = ChannelSink::new();
    let connector = Arc::new(TungsteniteConnector::new(config.heartbeat_config()));
    let (client, manager_task) = StreamClient::spawn(connector, Arc::new(sink));
    let event_logger = tokio::spawn(log_events(events));

    let health_handle = if config.server.health_enabled() {
        let state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            client.clone(),
        ));
        let server = HealthServer::new(config.server.health_port, state, shutdown_token.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        }))
    } else {
        tracing::info!("Health server disabled");
        None
    };

    client.open(config.stream_config()).await?;

    await_shutdown(shutdown_token.clone()).await;

    if let Err(e) = client.close().await {
        tracing::warn!(error = %e, "Client already stopped");
    }
    drop(client);

    let drain = async {
        if let Some(handle) = health_handle {
            let _ = handle.await;
        }
        let _ = manager_task.await;
        let _ = event_logger.await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out"
        );
    }

    tracing::info!("Chart Stream stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        target_symbol = %config.stream.target.symbol,
        mode = config.stream.target.mode.as_str(),
        granularity = config.stream.target.granularity,
        endpoints = config.stream.endpoints.len(),
        authenticated = config.stream.token.is_some(),
        auto_reconnect = config.stream.auto_reconnect,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        endpoints = ?config.stream.endpoints,
        app_id = %config.stream.app_id,
        "Quote service endpoints"
    );
}

/// Log every event the client delivers until the client goes away.
async fn log_events(mut events: mpsc::UnboundedReceiver<StreamEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Status { state, message } => {
                tracing::info!(
                    state = state.as_str(),
                    message = message.as_deref().unwrap_or(""),
                    "Connection status"
                );
            }
            StreamEvent::Tick(tick) => {
                tracing::info!(epoch = tick.epoch, price = tick.price, "Tick");
            }
            StreamEvent::Candles(bars) => {
                tracing::info!(
                    count = bars.len(),
                    first_epoch = bars.first().map(|b| b.epoch),
                    last_epoch = bars.last().map(|b| b.epoch),
                    "Candle snapshot"
                );
            }
            StreamEvent::Error(error) => {
                tracing::warn!(
                    kind = error.kind.as_str(),
                    code = %error.code,
                    fatal = error.fatal,
                    message = %error.message,
                    "Stream error"
                );
            }
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
