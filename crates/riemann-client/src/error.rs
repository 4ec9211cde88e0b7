use std::sync::Arc;

use thiserror::Error;

/// Every failure a send, query or lifecycle call can produce.
///
/// Errors are delivered into promises and may be observed by many waiters,
/// so the type is `Clone`; I/O errors are shared behind an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The collector refused the connection.
    #[error("connection refused to {addr}: {reason}")]
    ConnectionRefused {
        /// Address dialed.
        addr: String,
        /// Underlying cause.
        reason: String,
    },

    /// Connecting took longer than the connect timeout.
    #[error("connection timeout after {timeout_ms}ms to {addr}")]
    ConnectionTimeout {
        /// Address dialed.
        addr: String,
        /// Timeout that expired.
        timeout_ms: u64,
    },

    /// The channel went away before a response arrived.
    #[error("channel closed: {reason}")]
    ChannelClosed {
        /// Why the channel closed.
        reason: String,
    },

    /// The transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// Name resolution failed.
    #[error("could not resolve {host}: {reason}")]
    Resolve {
        /// Host looked up.
        host: String,
        /// Underlying cause.
        reason: String,
    },

    /// TLS setup or handshake failed.
    #[error("TLS error: {reason}")]
    Tls {
        /// Underlying cause.
        reason: String,
    },

    /// Too many writes in flight; back off and retry.
    #[error("client write buffer is full: {outstanding} / {limit} messages")]
    Overloaded {
        /// Writes holding a permit.
        outstanding: usize,
        /// Configured write limit.
        limit: usize,
    },

    /// The collector answered with `ok = false`.
    #[error("server error: {0}")]
    ServerRejected(String),

    /// The encoded message exceeds the size cap.
    #[error("message too large: {size} bytes (max {max_size})")]
    MessageTooLarge {
        /// Encoded size.
        size: usize,
        /// Allowed maximum.
        max_size: usize,
    },

    /// A malformed frame was read.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// What was wrong with it.
        reason: String,
    },

    /// A payload did not decode.
    #[error("decode error: {0}")]
    Decode(String),

    /// The transport cannot do this.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A setting is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Socket or file I/O failed.
    #[error(transparent)]
    Io(Arc<std::io::Error>),
}

impl Error {
    /// Shorthand for a `ChannelClosed` error.
    pub fn channel_closed(reason: impl Into<String>) -> Self {
        Error::ChannelClosed {
            reason: reason.into(),
        }
    }

    /// True for failures caused by the link to the collector rather than by
    /// the collector's answer or by local backpressure.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::ConnectionRefused { .. }
                | Error::ConnectionTimeout { .. }
                | Error::ChannelClosed { .. }
                | Error::NotConnected
                | Error::Resolve { .. }
                | Error::Tls { .. }
                | Error::Io(_)
        )
    }

    /// True when the write limiter rejected the send.
    pub fn is_overloaded(&self) -> bool {
        matches!(self, Error::Overloaded { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl From<prost::DecodeError> for Error {
    fn from(e: prost::DecodeError) -> Self {
        Error::Decode(e.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
