// Error taxonomy for the server core
// Transient per-connection failures are contained to that connection;
// only listener death or an explicit shutdown terminates the server loops.

use thiserror::Error;

use crate::wire::WireError;

/// Errors surfaced by the server core and by per-query operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The server has been shut down (or the dispatch channel is gone).
    /// All subsequent server and query operations report this.
    #[error("server closed")]
    Closed,

    /// A connection was force-closed (expired, buried, or hijacked away)
    /// while an operation on it was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// A time-bounded operation ran out of budget.
    #[error("timeout")]
    Timeout,

    /// An extension failed while writing a response; the connection was
    /// buried and earlier chain calls were not rolled back.
    #[error("extension {0} failed: {1}")]
    Extension(String, anyhow::Error),

    /// HTTP wire-level failure (parse or framing).
    #[error("wire: {0}")]
    Wire(#[from] WireError),

    /// Underlying socket failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
