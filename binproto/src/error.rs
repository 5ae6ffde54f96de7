//! Error types for the transport and file-transfer drivers.
//!
//! This module defines all possible errors that can occur during
//! transport operations.

use std::fmt;

/// Result type alias for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the transport protocol.
#[derive(Debug)]
pub enum Error {
    /// No response arrived within the inner deadline. Recoverable by
    /// retransmit within the outer deadline; only escapes to the caller
    /// as [`Error::ConnectionLost`] once the outer deadline expires.
    ReadTimeout,

    /// The outer deadline (20x the response timeout) elapsed, or the
    /// receive task exhausted its reconnect attempts.
    ConnectionLost,

    /// An `ok`/`rs` response carried a sequence number that did not match
    /// the current `sync`.
    SynchronizationError,

    /// Payload exceeds the current `max_block_size`. Never transmitted.
    PayloadOverflow,

    /// The peer reported a fatal error (`fe ...`).
    FatalError,

    /// The peer reported `PFT:fail` while opening a file.
    OpenFailed,

    /// Underlying byte-link or filesystem I/O failure.
    Io(std::io::Error),

    /// Malformed wire data that doesn't fit a more specific variant.
    Protocol(String),
}

impl Error {
    /// Returns a human-readable description of the error.
    pub fn as_str(&self) -> &str {
        match self {
            Error::ReadTimeout => "read timeout",
            Error::ConnectionLost => "connection lost",
            Error::SynchronizationError => "synchronization error",
            Error::PayloadOverflow => "payload overflow",
            Error::FatalError => "peer reported fatal error",
            Error::OpenFailed => "peer refused to open file",
            Error::Io(_) => "I/O error",
            Error::Protocol(msg) => msg,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serialport::Error> for Error {
    fn from(e: serialport::Error) -> Self {
        Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}
