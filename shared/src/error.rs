//! Error types for HookTunnel.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// No session is registered under the identifier.
    #[error("webhook not found: {0}")]
    NotFound(String),

    /// The session exists but no client stream is attached to it.
    #[error("no client stream attached for webhook: {0}")]
    LinkUnavailable(String),

    /// Pushing a delivery onto an attached stream failed.
    #[error("failed to transmit delivery: {0}")]
    Transmit(String),

    /// Connection establishment or streaming transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("registration rejected: {0}")]
    Registration(String),

    #[error("stream closed by relay")]
    StreamClosed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout")]
    Timeout,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol(e.to_string())
    }
}
