//! Relay error types.
//!
//! The taxonomy follows the failure model of the proxy:
//!
//! - `Framing` and `Encryption` are connection-fatal: the pair is closed.
//! - `CryptoConfiguration` indicates a broken deployment (missing or
//!   unusable crypto primitives) and is surfaced at startup.
//! - `Auth` is recoverable: the session continues and the remote server
//!   stays authoritative over whether the client is kicked.
//! - `UnknownSpecification` / `UnknownType` are programming errors in
//!   registry usage and are never retried.

use thiserror::Error;

/// Relay errors.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Malformed varint, truncated frame, or other wire-level violation.
    #[error("Framing error: {0}")]
    Framing(String),

    /// Key exchange or cipher-stream violation from a peer.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Crypto primitives unavailable or key generation failed.
    #[error("Crypto configuration error: {0}")]
    CryptoConfiguration(String),

    /// Session-join backend rejected the join or could not be reached.
    #[error("Session authentication failed (status {status})")]
    Auth {
        /// HTTP status returned by the backend.
        status: u16,
    },

    /// No packet specification registered for the requested shape.
    #[error("Unknown specification: {0}")]
    UnknownSpecification(String),

    /// No field codec registered for a type token.
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl From<toml::de::Error> for RelayError {
    fn from(err: toml::de::Error) -> Self {
        RelayError::Config(err.to_string())
    }
}

impl From<rsa::Error> for RelayError {
    fn from(err: rsa::Error) -> Self {
        RelayError::Encryption(err.to_string())
    }
}

impl RelayError {
    /// True when the error is an I/O condition that normally accompanies a
    /// socket being closed from the other side or by [`close`] on the pair.
    ///
    /// [`close`]: crate::net::ConnectionPair::close
    pub fn is_disconnect(&self) -> bool {
        match self {
            RelayError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}
