//! Error types for Foreman

use thiserror::Error;

use crate::session::SessionState;

/// Result type alias for Foreman operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single call to the remote API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection, DNS or timeout failure before a status was received
    #[error("Network error: {0}")]
    Network(String),

    /// Remote rejected the request with a non-2xx status
    #[error("API error (HTTP {status}): {reason}")]
    Api { status: u16, reason: String },

    /// Response body could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Request could not be built locally (bad path or URL)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether another attempt could plausibly succeed
    ///
    /// Network failures, 429 and 5xx responses are transient. Other 4xx
    /// responses, malformed bodies and requests that could not be built are
    /// surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) => true,
            TransportError::Api { status, .. } => *status == 429 || (500..600).contains(status),
            TransportError::Serialization(_) | TransportError::InvalidRequest(_) => false,
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Serialization(err.to_string())
    }
}

/// Error type for Foreman operations
#[derive(Error, Debug)]
pub enum Error {
    /// Caller supplied invalid input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown session id
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Operation not legal in the session's current state
    #[error("Cannot {operation} session {session_id} in state {state}")]
    InvalidState {
        session_id: String,
        state: SessionState,
        operation: &'static str,
    },

    /// Pre-flight rate limit denial
    #[error("Rate limit exceeded for {resource}")]
    RateLimited { resource: String },

    /// Remote call failed after retries
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
