//! Streaming Client
//!
//! [`StreamClient`] is a cloneable handle to a single connection manager
//! task. The task owns everything that changes over a connection's life:
//! the socket, the handshake and failover timers, the authorization state and
//! the subscription target. Handles talk to it over a command channel and
//! wait for an acknowledgement, so when `close().await` returns the socket
//! and all timers are already gone.
//!
//! # Lifecycle
//!
//! ```text
//! open ─► Connecting ──socket open──► Connected ─► authorize? ─► subscribe
//!             │  handshake timeout                   │
//!             ├─► next endpoint after a short delay  └─ close ─► Disconnected
//!             └─► Error("connection timeout")
//! ```
//!
//! Failures are reported through the [`EventSink`]; nothing reconnects
//! unless the caller asks for it or `auto_reconnect` is enabled.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tracing::Instrument;
use uuid::Uuid;

use super::auth::{AuthError, AuthSession, AuthStart, AuthState, Credential, validate};
use super::codec::MessageDecoder;
use super::messages::{InboundMessage, OutboundMessage, ServerError};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::subscription::{DEFAULT_CANDLE_COUNT, SubscriptionController};
use crate::application::ports::{Connection, Connector, EventSink, TransportError, TransportEvent};
use crate::domain::streaming::{ConnectionState, ErrorEvent, ErrorKind};
use crate::domain::subscription::{
    StreamMode, SubscriptionTarget, TargetUpdate, is_supported_granularity,
};
use crate::infrastructure::metrics::{self, ReconnectTrigger};

// =============================================================================
// Constants
// =============================================================================

/// Default quote-service endpoints, tried in order.
pub const DEFAULT_ENDPOINTS: &[&str] = &[
    "wss://ws.derivws.com/websockets/v3",
    "wss://ws.binaryws.com/websockets/v3",
];

/// Default application id.
pub const DEFAULT_APP_ID: &str = "1089";

/// Default deadline for a socket to open.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default pause before trying the next endpoint.
pub const DEFAULT_FAILOVER_DELAY: Duration = Duration::from_secs(1);

/// Status message after the last endpoint timed out.
pub const CONNECTION_TIMEOUT_MESSAGE: &str = "connection timeout";

const COMMAND_BUFFER: usize = 32;

// =============================================================================
// Error Type
// =============================================================================

/// Invariant violations surfaced by the handle. Network, protocol and
/// authorization failures are reported through the [`EventSink`] instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The manager task is gone.
    #[error("stream manager has stopped")]
    ManagerStopped,

    /// `reconnect` or `set_credential` before any `open`.
    #[error("client has not been opened")]
    NotOpened,

    /// `open` with an empty endpoint list.
    #[error("no endpoints configured")]
    NoEndpoints,

    /// Candle granularity the quote service does not offer.
    #[error("unsupported candle granularity: {0}s")]
    UnsupportedGranularity(u32),
}

// =============================================================================
// Configuration
// =============================================================================

/// Everything `open` needs.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Endpoint base URLs, tried in order on handshake timeout.
    pub endpoints: Vec<String>,
    /// Application id appended as `?app_id=`.
    pub app_id: String,
    /// Optional API token.
    pub credential: Option<String>,
    /// Initial subscription target.
    pub target: SubscriptionTarget,
    /// Candles per snapshot in candle mode.
    pub candle_count: u32,
    /// Deadline for a socket to open.
    pub handshake_timeout: Duration,
    /// Pause before trying the next endpoint.
    pub failover_delay: Duration,
    /// Reconnect on failures with backoff.
    pub auto_reconnect: bool,
    /// Backoff used when `auto_reconnect` is set.
    pub reconnect: ReconnectConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_ENDPOINTS.iter().map(|e| (*e).to_string()).collect(),
            app_id: DEFAULT_APP_ID.to_string(),
            credential: None,
            target: SubscriptionTarget::default(),
            candle_count: DEFAULT_CANDLE_COUNT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            failover_delay: DEFAULT_FAILOVER_DELAY,
            auto_reconnect: false,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl StreamConfig {
    /// Create a configuration for the given endpoints and application id.
    #[must_use]
    pub fn new(endpoints: Vec<String>, app_id: impl Into<String>) -> Self {
        Self {
            endpoints,
            app_id: app_id.into(),
            ..Self::default()
        }
    }

    /// Set the API token.
    #[must_use]
    pub fn with_credential(mut self, token: impl Into<String>) -> Self {
        self.credential = Some(token.into());
        self
    }

    /// Set the initial target.
    #[must_use]
    pub fn with_target(mut self, target: SubscriptionTarget) -> Self {
        self.target = target;
        self
    }

    /// Set the handshake deadline.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the failover pause.
    #[must_use]
    pub const fn with_failover_delay(mut self, delay: Duration) -> Self {
        self.failover_delay = delay;
        self
    }

    /// Enable auto-reconnect with the given backoff.
    #[must_use]
    pub fn with_auto_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.auto_reconnect = true;
        self.reconnect = reconnect;
        self
    }

    /// Full URL for the endpoint at `index`.
    #[must_use]
    pub fn endpoint_url(&self, index: usize) -> Option<String> {
        self.endpoints.get(index).map(|endpoint| {
            let separator = if endpoint.contains('?') { '&' } else { '?' };
            format!("{endpoint}{separator}app_id={}", self.app_id)
        })
    }
}

// =============================================================================
// Status
// =============================================================================

/// Snapshot of a client, readable without talking to the manager task.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientStatus {
    /// Connection state.
    pub state: ConnectionState,
    /// Context for the state, e.g. the error message.
    pub message: Option<String>,
    /// Whether the server accepted the token on the live socket.
    pub authenticated: bool,
    /// URL of the current or last endpoint.
    pub endpoint: Option<String>,
    /// Current subscription target.
    pub target: SubscriptionTarget,
    /// Whether a socket is held.
    pub live_socket: bool,
}

// =============================================================================
// Handle
// =============================================================================

enum Command {
    Open {
        config: Box<StreamConfig>,
        ack: oneshot::Sender<Result<(), ClientError>>,
    },
    Close {
        ack: oneshot::Sender<()>,
    },
    Reconnect {
        ack: oneshot::Sender<Result<(), ClientError>>,
    },
    Retarget {
        update: TargetUpdate,
        ack: oneshot::Sender<()>,
    },
    SetCredential {
        token: Option<String>,
        ack: oneshot::Sender<Result<(), ClientError>>,
    },
}

/// Handle to a streaming client.
///
/// Clones share one manager task. The task exits once every handle is
/// dropped, closing the socket on its way out.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use chart_stream::application::services::ChannelSink;
/// use chart_stream::infrastructure::deriv::{StreamClient, StreamConfig, TungsteniteConnector};
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let (sink, mut events) = ChannelSink::new();
///     let (client, _task) =
///         StreamClient::spawn(Arc::new(TungsteniteConnector::default()), Arc::new(sink));
///
///     client.open(StreamConfig::default()).await?;
///     while let Some(event) = events.recv().await {
///         println!("{event:?}");
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct StreamClient {
    id: Uuid,
    commands: mpsc::Sender<Command>,
    status: Arc<RwLock<ClientStatus>>,
}

impl StreamClient {
    /// Start a manager task and return its handle.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        connector: Arc<dyn Connector>,
        sink: Arc<dyn EventSink>,
    ) -> (Self, JoinHandle<()>) {
        let id = Uuid::new_v4();
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let status = Arc::new(RwLock::new(ClientStatus::default()));

        let manager = ConnectionManager::new(connector, sink, Arc::clone(&status));
        let span = tracing::info_span!("stream_client", client_id = %id);
        let task = tokio::spawn(manager.run(rx).instrument(span));

        (
            Self {
                id,
                commands,
                status,
            },
            task,
        )
    }

    /// Client id used in logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.status.read().state
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> ClientStatus {
        self.status.read().clone()
    }

    /// Tear down any existing socket and connect with `config`, starting at
    /// its first endpoint.
    ///
    /// # Errors
    ///
    /// Returns `NoEndpoints` for an empty endpoint list, or `ManagerStopped`.
    pub async fn open(&self, config: StreamConfig) -> Result<(), ClientError> {
        self.request(|ack| Command::Open {
            config: Box::new(config),
            ack,
        })
        .await?
    }

    /// Drop the socket and cancel timers. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `ManagerStopped` if the manager task is gone.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.request(|ack| Command::Close { ack }).await
    }

    /// `close` followed by `open` with the last configuration and the current
    /// subscription target.
    ///
    /// # Errors
    ///
    /// Returns `NotOpened` before the first `open`, or `ManagerStopped`.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        self.request(|ack| Command::Reconnect { ack }).await?
    }

    /// Switch instrument.
    ///
    /// # Errors
    ///
    /// Returns `ManagerStopped` if the manager task is gone.
    pub async fn set_symbol(&self, symbol: impl Into<String>) -> Result<(), ClientError> {
        self.retarget(TargetUpdate::Symbol(symbol.into())).await
    }

    /// Switch between ticks and candles.
    ///
    /// # Errors
    ///
    /// Returns `ManagerStopped` if the manager task is gone.
    pub async fn set_mode(&self, mode: StreamMode) -> Result<(), ClientError> {
        self.retarget(TargetUpdate::Mode(mode)).await
    }

    /// Change the candle bucket size. In tick mode the size is only stored
    /// for the next switch to candles; the live stream is left alone.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedGranularity` for sizes the service does not offer,
    /// or `ManagerStopped`.
    pub async fn set_granularity(&self, seconds: u32) -> Result<(), ClientError> {
        if !is_supported_granularity(seconds) {
            return Err(ClientError::UnsupportedGranularity(seconds));
        }
        self.retarget(TargetUpdate::Granularity(seconds)).await
    }

    /// Replace the whole target.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedGranularity` for a candle target with an unsupported
    /// size, or `ManagerStopped`.
    pub async fn set_target(&self, target: SubscriptionTarget) -> Result<(), ClientError> {
        if target.mode == StreamMode::Candle && !is_supported_granularity(target.granularity) {
            return Err(ClientError::UnsupportedGranularity(target.granularity));
        }
        self.retarget(TargetUpdate::Replace(target)).await
    }

    /// Replace the API token. Used from the next socket on, typically via
    /// [`reconnect`](Self::reconnect) after an authorization failure.
    ///
    /// # Errors
    ///
    /// Returns `NotOpened` before the first `open`, or `ManagerStopped`.
    pub async fn set_credential(&self, token: Option<String>) -> Result<(), ClientError> {
        self.request(|ack| Command::SetCredential { token, ack }).await?
    }

    async fn retarget(&self, update: TargetUpdate) -> Result<(), ClientError> {
        self.request(|ack| Command::Retarget { update, ack }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (ack, reply) = oneshot::channel();
        self.commands
            .send(build(ack))
            .await
            .map_err(|_| ClientError::ManagerStopped)?;
        reply.await.map_err(|_| ClientError::ManagerStopped)
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

/// An in-flight connect. Dropping it cancels both the connect and its
/// handshake deadline.
struct Attempt {
    endpoint_index: usize,
    url: String,
    started: Instant,
    connect: BoxFuture<'static, Result<Connection, TransportError>>,
    deadline: Pin<Box<Sleep>>,
}

enum AttemptOutcome {
    Opened(Connection),
    Failed(TransportError),
    TimedOut,
}

impl Attempt {
    async fn settle(&mut self) -> AttemptOutcome {
        tokio::select! {
            biased;
            result = &mut self.connect => match result {
                Ok(connection) => AttemptOutcome::Opened(connection),
                Err(e) => AttemptOutcome::Failed(e),
            },
            () = &mut self.deadline => AttemptOutcome::TimedOut,
        }
    }
}

/// Pending move to the next endpoint.
struct Failover {
    endpoint_index: usize,
    timer: Pin<Box<Sleep>>,
}

enum Step {
    Command(Command),
    Shutdown,
    Attempt(AttemptOutcome),
    Failover,
    Socket(Option<TransportEvent>),
    Retry,
}

struct ConnectionManager {
    connector: Arc<dyn Connector>,
    sink: Arc<dyn EventSink>,
    status: Arc<RwLock<ClientStatus>>,
    decoder: MessageDecoder,
    config: Option<StreamConfig>,
    auth: AuthSession,
    subscription: SubscriptionController,
    policy: ReconnectPolicy,
    state: ConnectionState,
    message: Option<String>,
    endpoint: Option<String>,
    socket: Option<Connection>,
    attempt: Option<Attempt>,
    failover: Option<Failover>,
    retry: Option<Pin<Box<Sleep>>>,
}

impl ConnectionManager {
    fn new(
        connector: Arc<dyn Connector>,
        sink: Arc<dyn EventSink>,
        status: Arc<RwLock<ClientStatus>>,
    ) -> Self {
        Self {
            connector,
            sink,
            status,
            decoder: MessageDecoder::new(),
            config: None,
            auth: AuthSession::default(),
            subscription: SubscriptionController::default(),
            policy: ReconnectPolicy::new(ReconnectConfig::default()),
            state: ConnectionState::Disconnected,
            message: None,
            endpoint: None,
            socket: None,
            attempt: None,
            failover: None,
            retry: None,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::debug!("Stream manager started");
        self.publish();

        loop {
            let step = tokio::select! {
                biased;
                command = commands.recv() => command.map_or(Step::Shutdown, Step::Command),
                event = next_socket_event(&mut self.socket) => Step::Socket(event),
                outcome = settle_attempt(&mut self.attempt) => Step::Attempt(outcome),
                () = wait_failover(&mut self.failover) => Step::Failover,
                () = wait_timer(&mut self.retry) => Step::Retry,
            };

            match step {
                Step::Command(command) => self.on_command(command),
                Step::Shutdown => {
                    self.close();
                    self.publish();
                    break;
                }
                Step::Attempt(outcome) => self.on_attempt(outcome),
                Step::Failover => self.on_failover(),
                Step::Socket(event) => self.on_socket_event(event),
                Step::Retry => self.on_retry(),
            }
            self.publish();
        }

        tracing::debug!("Stream manager stopped");
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Open { config, ack } => {
                let result = self.open(*config);
                self.publish();
                let _ = ack.send(result);
            }
            Command::Close { ack } => {
                self.close();
                self.publish();
                let _ = ack.send(());
            }
            Command::Reconnect { ack } => {
                let result = self.reconnect();
                self.publish();
                let _ = ack.send(result);
            }
            Command::Retarget { update, ack } => {
                self.retarget(update);
                self.publish();
                let _ = ack.send(());
            }
            Command::SetCredential { token, ack } => {
                let result = match self.config.as_mut() {
                    Some(config) => {
                        config.credential = token;
                        Ok(())
                    }
                    None => Err(ClientError::NotOpened),
                };
                let _ = ack.send(result);
            }
        }
    }

    fn open(&mut self, config: StreamConfig) -> Result<(), ClientError> {
        if config.endpoints.is_empty() {
            return Err(ClientError::NoEndpoints);
        }

        self.close();
        self.subscription = SubscriptionController::new(config.target.clone(), config.candle_count);
        self.policy = ReconnectPolicy::new(config.reconnect.clone());
        self.config = Some(config);
        self.start_attempt(0);
        Ok(())
    }

    fn close(&mut self) {
        self.attempt = None;
        self.failover = None;
        self.retry = None;
        if self.socket.take().is_some() {
            tracing::info!("Closed quote stream socket");
        }
        self.auth.reset();
        self.subscription.reset();
        self.transition(ConnectionState::Disconnected, None);
    }

    fn reconnect(&mut self) -> Result<(), ClientError> {
        if self.config.is_none() {
            return Err(ClientError::NotOpened);
        }

        metrics::record_reconnect(ReconnectTrigger::Manual);
        tracing::info!(target = %self.subscription.target(), "Reconnecting");
        self.close();
        self.policy.reset();
        self.start_attempt(0);
        Ok(())
    }

    fn retarget(&mut self, update: TargetUpdate) {
        if !self.subscription.update(update) {
            return;
        }
        tracing::info!(target = %self.subscription.target(), "Subscription target changed");

        if self.socket.is_some() && self.state.is_connected() && !self.auth.is_pending() {
            for frame in self.subscription.retarget_frames() {
                self.send(&frame);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Connect, failover, auto-reconnect
    // -------------------------------------------------------------------------

    fn start_attempt(&mut self, endpoint_index: usize) {
        let Some(config) = self.config.as_ref() else {
            return;
        };
        let Some(url) = config.endpoint_url(endpoint_index) else {
            return;
        };
        let handshake_timeout = config.handshake_timeout;

        tracing::info!(url = %url, endpoint_index, "Connecting to quote stream");

        let connector = Arc::clone(&self.connector);
        let connect_url = url.clone();
        self.attempt = Some(Attempt {
            endpoint_index,
            url: url.clone(),
            started: Instant::now(),
            connect: Box::pin(async move { connector.connect(&connect_url).await }),
            deadline: Box::pin(tokio::time::sleep(handshake_timeout)),
        });
        self.endpoint = Some(url.clone());

        let message = (endpoint_index > 0).then(|| format!("trying fallback endpoint {url}"));
        self.transition(ConnectionState::Connecting, message);
    }

    fn on_attempt(&mut self, outcome: AttemptOutcome) {
        let Some(attempt) = self.attempt.take() else {
            return;
        };

        match outcome {
            AttemptOutcome::Opened(connection) => self.on_open(connection, &attempt),
            AttemptOutcome::Failed(err) => {
                tracing::warn!(url = %attempt.url, error = %err, "Connect failed");
                let message = self.failure_message(&err.to_string());
                self.fail(ErrorKind::Connection, "ConnectionError", message);
                self.schedule_retry();
            }
            AttemptOutcome::TimedOut => self.on_handshake_timeout(&attempt),
        }
    }

    fn on_open(&mut self, connection: Connection, attempt: &Attempt) {
        metrics::record_handshake(attempt.started.elapsed());
        tracing::info!(url = %attempt.url, "Quote stream connected");

        self.socket = Some(connection);
        self.policy.reset();
        self.transition(ConnectionState::Connected, None);

        let credential = self
            .config
            .as_ref()
            .and_then(|c| c.credential.clone())
            .map(Credential::new);
        self.auth.set_credential(credential);

        match self.auth.begin() {
            AuthStart::Authorize(request) => {
                tracing::debug!("Sending authorize request");
                self.send(&OutboundMessage::Authorize(request));
            }
            AuthStart::Skip => {
                tracing::debug!("No API token configured, streaming public data");
                self.subscribe();
            }
            AuthStart::InvalidCredential => {
                let err = AuthError::InvalidFormat;
                tracing::warn!(error = %err, "Skipping authorization");
                self.sink.on_error(ErrorEvent::new(
                    ErrorKind::Auth,
                    err.code(),
                    err.to_string(),
                    false,
                ));
                self.subscribe();
            }
        }
    }

    fn on_handshake_timeout(&mut self, attempt: &Attempt) {
        let Some(config) = self.config.as_ref() else {
            return;
        };
        tracing::warn!(
            url = %attempt.url,
            timeout_secs = config.handshake_timeout.as_secs_f64(),
            "Handshake timed out"
        );

        let next = attempt.endpoint_index + 1;
        if next < config.endpoints.len() {
            metrics::record_failover();
            let delay = config.failover_delay;
            self.failover = Some(Failover {
                endpoint_index: next,
                timer: Box::pin(tokio::time::sleep(delay)),
            });
            self.transition(
                ConnectionState::Connecting,
                Some(format!(
                    "handshake timed out, failing over in {}ms",
                    delay.as_millis()
                )),
            );
        } else {
            self.fail(
                ErrorKind::Timeout,
                "ConnectionTimeout",
                CONNECTION_TIMEOUT_MESSAGE.to_string(),
            );
            self.schedule_retry();
        }
    }

    fn on_failover(&mut self) {
        if let Some(failover) = self.failover.take() {
            self.start_attempt(failover.endpoint_index);
        }
    }

    fn schedule_retry(&mut self) {
        let Some(config) = self.config.as_ref() else {
            return;
        };
        if !config.auto_reconnect {
            return;
        }

        match self.policy.next_delay() {
            Some(delay) => {
                tracing::info!(
                    attempt = self.policy.attempt_count(),
                    delay_ms = delay.as_millis(),
                    "Scheduling auto-reconnect"
                );
                self.retry = Some(Box::pin(tokio::time::sleep(delay)));
            }
            None => tracing::warn!("Auto-reconnect attempts exhausted"),
        }
    }

    fn on_retry(&mut self) {
        self.retry = None;
        metrics::record_reconnect(ReconnectTrigger::Automatic);
        tracing::info!(
            attempt = self.policy.attempt_count(),
            target = %self.subscription.target(),
            "Auto-reconnecting"
        );
        self.subscription.reset();
        self.start_attempt(0);
    }

    // -------------------------------------------------------------------------
    // Live socket
    // -------------------------------------------------------------------------

    fn on_socket_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Text(text)) => self.on_frame(&text),
            Some(TransportEvent::Closed { reason }) => self.on_socket_closed(&reason),
            Some(TransportEvent::Error(detail)) => self.on_socket_error(&detail),
            None => self.on_socket_closed("socket task ended"),
        }
    }

    /// Drop the socket. Returns `true` if authorization had failed on it.
    fn drop_socket(&mut self) -> bool {
        let auth_failed = matches!(self.auth.state(), AuthState::Failed);
        self.socket = None;
        self.auth.reset();
        self.subscription.reset();
        auth_failed
    }

    fn on_socket_closed(&mut self, reason: &str) {
        tracing::info!(reason = %reason, "Quote stream closed");
        let auth_failed = self.drop_socket();
        let message = (!reason.is_empty()).then(|| reason.to_string());
        self.transition(ConnectionState::Disconnected, message);
        if !auth_failed {
            self.schedule_retry();
        }
    }

    fn on_socket_error(&mut self, detail: &str) {
        tracing::warn!(error = %detail, "Quote stream socket error");
        let auth_failed = self.drop_socket();
        let message = self.failure_message(detail);
        self.fail(ErrorKind::Connection, "ConnectionError", message);
        if !auth_failed {
            self.schedule_retry();
        }
    }

    fn on_frame(&mut self, text: &str) {
        let message = self.decoder.decode(text);
        metrics::record_frame_received(message.kind());

        match message {
            InboundMessage::HeartbeatPing { token } => {
                self.send(&OutboundMessage::pong(token));
            }
            InboundMessage::AuthResult(info) => {
                if self.auth.is_pending() {
                    self.auth.on_authorized(&info);
                    tracing::info!("Authorized");
                    self.subscribe();
                } else {
                    tracing::debug!("Ignoring unsolicited authorize response");
                }
            }
            InboundMessage::ServerError(err) => self.on_server_error(&err),
            InboundMessage::Tick {
                update,
                symbol,
                subscription_id,
            } => {
                if !self
                    .subscription
                    .accepts_tick(symbol.as_deref(), subscription_id.as_deref())
                {
                    tracing::debug!(
                        symbol = symbol.as_deref().unwrap_or(""),
                        subscription_id = subscription_id.as_deref().unwrap_or(""),
                        target = %self.subscription.target(),
                        "Dropping tick for a previous subscription"
                    );
                    return;
                }
                if let Some(id) = subscription_id {
                    self.subscription.acknowledge(id);
                }
                if self.state.is_connected() {
                    self.sink.on_tick(update);
                }
            }
            InboundMessage::CandleSnapshot(bars) => {
                if self.state.is_connected() {
                    tracing::debug!(count = bars.len(), "Candle snapshot received");
                    self.sink.on_candles(bars);
                }
            }
            InboundMessage::SubscriptionAck { id } => self.subscription.acknowledge(id),
            InboundMessage::ForgetResult { forgotten } => {
                tracing::debug!(forgotten, "Previous subscription forgotten");
            }
            InboundMessage::ProtocolError(detail) => {
                metrics::record_protocol_error();
                tracing::warn!(error = %detail, "Undecodable frame");
                self.sink.on_error(ErrorEvent::protocol(detail));
            }
        }
    }

    fn on_server_error(&mut self, err: &ServerError) {
        if self.auth.is_pending() || err.is_authorize_response() || err.is_authorization_required()
        {
            let auth_err = self.auth.on_error(err);
            tracing::error!(code = %err.code, error = %auth_err, "Authorization failed");
            let code = auth_err.code().to_string();
            self.fail(ErrorKind::Auth, &code, auth_err.to_string());
        } else {
            tracing::warn!(code = %err.code, message = %err.message, "Quote service error");
            self.sink.on_error(ErrorEvent::new(
                ErrorKind::Server,
                err.code.clone(),
                err.message.clone(),
                false,
            ));
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn subscribe(&mut self) {
        let request = self.subscription.subscribe();
        tracing::info!(target = %self.subscription.target(), "Subscribing");
        self.send(&request);
    }

    fn send(&self, message: &OutboundMessage) {
        let Some(socket) = self.socket.as_ref() else {
            tracing::error!(kind = message.kind(), "No live socket for outbound frame");
            return;
        };
        match message.to_json() {
            Ok(json) => {
                if socket.send(json).is_err() {
                    tracing::error!(kind = message.kind(), "Socket task gone, frame dropped");
                }
            }
            Err(e) => tracing::error!(kind = message.kind(), error = %e, "Failed to encode frame"),
        }
    }

    /// Network failure text, with a hint when the credential is the likelier
    /// cause.
    fn failure_message(&self, detail: &str) -> String {
        match self.config.as_ref().and_then(|c| c.credential.as_deref()) {
            None => format!("network failure: {detail} (no API token configured)"),
            Some(token) if !validate(token) => {
                format!("network failure: {detail} (API token format is invalid)")
            }
            Some(_) => format!("network failure: {detail}"),
        }
    }

    /// Report a fatal error and move to `Error`.
    fn fail(&mut self, kind: ErrorKind, code: &str, message: String) {
        self.transition(ConnectionState::Error, Some(message.clone()));
        self.sink.on_error(ErrorEvent::new(kind, code, message, true));
    }

    /// Change state, notifying the sink if the state or message changed.
    fn transition(&mut self, state: ConnectionState, message: Option<String>) {
        if self.state == state && message.is_none() {
            return;
        }
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "Connection state changed");
        }

        self.state = state;
        self.message.clone_from(&message);
        metrics::set_connection_state(state);
        {
            let mut status = self.status.write();
            status.state = state;
            status.message.clone_from(&message);
        }
        self.sink.on_status_change(state, message);
    }

    fn publish(&self) {
        let mut status = self.status.write();
        status.state = self.state;
        status.message.clone_from(&self.message);
        status.authenticated = self.auth.is_authenticated();
        status.endpoint.clone_from(&self.endpoint);
        status.target = self.subscription.target().clone();
        status.live_socket = self.socket.is_some();
    }
}

async fn next_socket_event(socket: &mut Option<Connection>) -> Option<TransportEvent> {
    match socket {
        Some(connection) => connection.recv().await,
        None => pending().await,
    }
}

async fn settle_attempt(attempt: &mut Option<Attempt>) -> AttemptOutcome {
    match attempt {
        Some(attempt) => attempt.settle().await,
        None => pending().await,
    }
}

async fn wait_failover(failover: &mut Option<Failover>) {
    match failover {
        Some(failover) => failover.timer.as_mut().await,
        None => pending().await,
    }
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}
