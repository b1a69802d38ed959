//! Quote Stream Authorization
//!
//! Validates the API token's shape and drives the authorize exchange.
//!
//! # Authorization Flow
//!
//! 1. Socket opens
//! 2. If a well-formed token is configured, send `{"authorize":"<token>","req_id":1}`
//! 3. Receive `{"authorize":{...}}` on success or `{"error":{"code",...}}`
//! 4. Subscribe only after success
//!
//! Without a token the exchange is skipped and the client streams public
//! data unauthenticated. A rejected token is fatal for that token: nothing
//! retries until a new one is supplied.
//!
//! # Error Codes
//!
//! - `InvalidToken`: the token is unknown or revoked
//! - `AuthorizationRequired`: the request needs an authorized session
//! - anything else is kept verbatim

use thiserror::Error;

use super::messages::{
    AUTHORIZATION_REQUIRED_CODE, AuthorizeInfo, AuthorizeRequest, INVALID_TOKEN_CODE, ServerError,
};

// =============================================================================
// Constants
// =============================================================================

/// Minimum token length accepted by [`validate`].
pub const MIN_TOKEN_LEN: usize = 10;

/// Error code reported when a configured token fails [`validate`].
pub const INVALID_TOKEN_FORMAT_CODE: &str = "InvalidTokenFormat";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during authorization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The server rejected the token.
    #[error("authorization failed: invalid API token ({0})")]
    InvalidToken(String),

    /// The server requires an authorized session.
    #[error("authorization required: {0}")]
    AuthorizationRequired(String),

    /// The token was not sent because it is malformed.
    #[error("API token format is invalid: expected at least 10 letters or digits")]
    InvalidFormat,

    /// Any other error response to the authorize request.
    #[error("authorization rejected ({code}): {message}")]
    Rejected {
        /// Error code from server
        code: String,
        /// Error message from server
        message: String,
    },
}

impl AuthError {
    /// Error code to surface to the consumer.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidToken(_) => INVALID_TOKEN_CODE,
            Self::AuthorizationRequired(_) => AUTHORIZATION_REQUIRED_CODE,
            Self::InvalidFormat => INVALID_TOKEN_FORMAT_CODE,
            Self::Rejected { code, .. } => code,
        }
    }
}

impl From<&ServerError> for AuthError {
    fn from(err: &ServerError) -> Self {
        match err.code.as_str() {
            INVALID_TOKEN_CODE => Self::InvalidToken(err.message.clone()),
            AUTHORIZATION_REQUIRED_CODE => Self::AuthorizationRequired(err.message.clone()),
            _ => Self::Rejected {
                code: err.code.clone(),
                message: err.message.clone(),
            },
        }
    }
}

// =============================================================================
// Credential
// =============================================================================

/// Check a token's shape: non-empty after trimming, at least
/// [`MIN_TOKEN_LEN`] characters, ASCII letters and digits only.
#[must_use]
pub fn validate(token: &str) -> bool {
    let token = token.trim();
    !token.is_empty()
        && token.len() >= MIN_TOKEN_LEN
        && token.chars().all(|c| c.is_ascii_alphanumeric())
}

/// API token plus its format-check result.
///
/// Validity says nothing about whether the server will accept the token.
/// The `Debug` implementation redacts the token for safe logging.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    valid: bool,
}

impl Credential {
    /// Wrap a token, trimming surrounding whitespace.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into().trim().to_string();
        let valid = validate(&token);
        Self { token, valid }
    }

    /// Get the token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether the token passed [`validate`].
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("valid", &self.valid)
            .finish()
    }
}

// =============================================================================
// Authorization State
// =============================================================================

/// Current state of authorization on the live socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    /// No socket, or nothing attempted yet.
    #[default]
    Disconnected,

    /// Authorize request sent, awaiting response.
    Pending,

    /// Token accepted.
    Authenticated,

    /// Token rejected.
    Failed,
}

/// What to do once a socket opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStart {
    /// Send this request and wait for the response before subscribing.
    Authorize(AuthorizeRequest),
    /// No token configured; subscribe straight away.
    Skip,
    /// A token is configured but malformed; report it and subscribe
    /// unauthenticated.
    InvalidCredential,
}

/// Authorization state machine for one client.
///
/// # Example
///
/// ```ignore
/// let mut session = AuthSession::new(Some(Credential::new("abcdef123456")));
///
/// // On socket open
/// if let AuthStart::Authorize(req) = session.begin() {
///     // send req, then on `{"authorize":{...}}`:
///     session.on_authorized(&info);
/// }
/// assert!(session.is_authenticated());
/// ```
#[derive(Debug, Default)]
pub struct AuthSession {
    credential: Option<Credential>,
    state: AuthState,
}

impl AuthSession {
    /// Create a session for an optional credential.
    #[must_use]
    pub const fn new(credential: Option<Credential>) -> Self {
        Self {
            credential,
            state: AuthState::Disconnected,
        }
    }

    /// Get the configured credential.
    #[must_use]
    pub const fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Replace the credential. Takes effect on the next socket.
    pub fn set_credential(&mut self, credential: Option<Credential>) {
        self.credential = credential;
        self.state = AuthState::Disconnected;
    }

    /// Get the current state.
    #[must_use]
    pub const fn state(&self) -> AuthState {
        self.state
    }

    /// Check if the server accepted the token.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated)
    }

    /// Check if an authorize request is in flight.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.state, AuthState::Pending)
    }

    /// Decide what to do on a freshly opened socket.
    pub fn begin(&mut self) -> AuthStart {
        match &self.credential {
            Some(credential) if credential.is_valid() => {
                self.state = AuthState::Pending;
                AuthStart::Authorize(AuthorizeRequest::new(credential.token()))
            }
            Some(_) => {
                self.state = AuthState::Disconnected;
                AuthStart::InvalidCredential
            }
            None => {
                self.state = AuthState::Disconnected;
                AuthStart::Skip
            }
        }
    }

    /// Process a successful authorize response.
    pub fn on_authorized(&mut self, info: &AuthorizeInfo) {
        tracing::debug!(
            loginid = info.loginid.as_deref().unwrap_or("-"),
            currency = info.currency.as_deref().unwrap_or("-"),
            "Authorization accepted"
        );
        self.state = AuthState::Authenticated;
    }

    /// Process an error response to the authorize request.
    pub fn on_error(&mut self, err: &ServerError) -> AuthError {
        self.state = AuthState::Failed;
        AuthError::from(err)
    }

    /// Reset after the socket goes away.
    pub const fn reset(&mut self) {
        self.state = AuthState::Disconnected;
    }
}
