//! Error types for channel operations.

use std::io;
use thiserror::Error;

use crate::wire::WireError;

/// Errors that can occur on a channel.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Underlying I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Received bytes do not form a valid frame.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// The remote end closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// A bounded retry policy ran out of connection attempts.
    #[error("gave up connecting to {address} after {attempts} attempts: {last_error}")]
    ConnectRetriesExhausted {
        /// Address that could not be reached.
        address: String,
        /// Number of attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last_error: String,
    },
}

/// Result type for channel operations.
pub type TransportResult<T> = Result<T, TransportError>;
