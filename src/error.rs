//! Error types for the Livestatus client.

use std::time::Duration;

use thiserror::Error;

/// Result type for Livestatus operations.
pub type LivestatusResult<T> = Result<T, LivestatusError>;

/// Livestatus client error type.
///
/// Transport-phase failures (connect, TLS, write, read, framing) are carried
/// inside [`QueryResult`](crate::QueryResult) with status code 500; lifecycle
/// failures (`Cancelled`, `Closed`, `AlreadyStarted`) are returned directly.
#[derive(Debug, Error)]
pub enum LivestatusError {
    /// IO error (socket read/write)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection could not be established
    #[error("failed to connect to livestatus: {0}")]
    Connect(String),

    /// TLS configuration or handshake error
    #[error("TLS error: {0}")]
    Tls(String),

    /// A transport phase exceeded its deadline
    #[error("{phase} timed out after {after:?}")]
    Timeout {
        phase: &'static str,
        after: Duration,
    },

    /// The fixed16 response preamble could not be parsed
    #[error("invalid fixed16 header: {0}")]
    Header(String),

    /// Declared body length is negative or exceeds the configured cap
    #[error("response too large: {length} bytes (cap {cap})")]
    Oversize { length: i64, cap: usize },

    /// Oversize body could not be drained; the connection is unusable
    #[error("response too large ({length} bytes) and drain failed: {reason}")]
    DrainFailed { length: i64, reason: String },

    /// Non-200 response; the message carries the server's body text
    #[error("livestatus status {code}: {message}")]
    Server { code: u16, message: String },

    /// A panic was recovered while processing a work item
    #[error("panic: {0}")]
    Panic(String),

    /// Enqueue was abandoned because the caller cancelled
    #[error("enqueue cancelled")]
    Cancelled,

    /// The actor has been closed
    #[error("actor is closed")]
    Closed,

    /// `start` was called a second time
    #[error("actor already started")]
    AlreadyStarted,
}
