//! Error types for the execution companion.

use crate::store::StoreError;

/// Top-level error type for a single turn of the progression engine.
///
/// Content-generation failures never appear here: the broker always masks
/// them with fallback content. A turn that returns `Err` did not commit all
/// of its required writes and must not be reported to the user as a success.
#[derive(Debug, thiserror::Error)]
pub enum EcosError {
    /// Durable store read or write failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport (stdin/stdout bridge) error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed wire envelope.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EcosError>;
