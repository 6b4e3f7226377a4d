//! Error types
//!
//! A single crate-wide error enum. Errors travel through `watch` and
//! `broadcast` channels to every consumer of a relay, so the type is `Clone`
//! and carries rendered messages instead of source errors.

use std::time::Duration;

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for relay and pool operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Handshake or transport failure on the stream connection
    #[error("connection error: {0}")]
    Connection(String),

    /// The server reported that the requested stream does not exist
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// No media arrived within the startup window
    #[error("no media received within {0:?}")]
    Timeout(Duration),

    /// Local I/O failure while writing the byte sink
    #[error("I/O error: {0}")]
    Io(String),

    /// The configured endpoint could not be turned into a stream URL
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The relay was stopped before it produced data
    #[error("relay cancelled")]
    Cancelled,

    /// `start` was called on a relay that is already running
    #[error("relay already started")]
    AlreadyStarted,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_conversion() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "disk full").into();
        assert_eq!(err, Error::Io("disk full".into()));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::StreamNotFound("cam1_sub".into()).to_string(),
            "stream not found: cam1_sub"
        );
        assert_eq!(
            Error::Timeout(Duration::from_secs(10)).to_string(),
            "no media received within 10s"
        );
    }
}
