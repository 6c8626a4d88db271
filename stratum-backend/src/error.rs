//! Error types for backend operations.

use stratum_core::EnvelopeError;
use thiserror::Error;

/// Error type for backend operations.
///
/// This enum categorizes errors from remote-store and backplane
/// interactions into distinct groups. The cache engine logs and swallows
/// all of them: a failing backend degrades the cache to L1-only, it never
/// fails caller operations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Internal backend error, state or computation error.
    ///
    /// Any error not related to network interaction.
    #[error(transparent)]
    InternalError(Box<dyn std::error::Error + Send>),

    /// Network interaction error.
    ///
    /// Errors occurring during communication with the remote store or the
    /// pub/sub transport.
    #[error(transparent)]
    ConnectionError(Box<dyn std::error::Error + Send>),

    /// Envelope encoding or decoding error.
    #[error(transparent)]
    EnvelopeError(#[from] EnvelopeError),

    /// An invalidation message failed to encode or decode.
    #[error("invalidation message codec error: {0}")]
    MessageError(#[from] serde_json::Error),
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
