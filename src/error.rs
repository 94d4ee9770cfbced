//! Error types for guestwire.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Main error type for all guestwire operations.
#[derive(Debug, Error)]
pub enum GuestwireError {
    /// I/O error on the control connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket failure on the control channel.
    #[error("WebSocket error: {0}")]
    WebSocket(#[source] tungstenite::Error),

    /// JSON serialization/deserialization error (configuration only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed endpoint URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Protocol error (malformed, oversized or inconsistent frame).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Data channel or control channel failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Blocking data-channel request exceeded its bound.
    #[error("Data channel request timed out")]
    Timeout,

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Invalid session or registry configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GuestwireError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        GuestwireError::Protocol(message.into())
    }

    /// Whether the error tears down the session.
    ///
    /// Every variant is fatal except configuration mistakes caught before a
    /// session starts.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, GuestwireError::Config(_))
    }
}

impl From<tungstenite::Error> for GuestwireError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Protocol(
                tungstenite::error::ProtocolError::ResetWithoutClosingHandshake,
            ) => GuestwireError::ConnectionClosed,
            tungstenite::Error::Io(e) => GuestwireError::Io(e),
            other => GuestwireError::WebSocket(other),
        }
    }
}

/// Result type alias using GuestwireError.
pub type Result<T> = std::result::Result<T, GuestwireError>;
