//! Error types for the Redis backend.
//!
//! All errors convert into [`BackendError`] for uniform handling in the
//! cache engine, which logs and swallows them: a failing Redis degrades
//! the cache to L1-only.
//!
//! [`BackendError`]: stratum_backend::BackendError

use redis::RedisError;
use stratum_backend::BackendError;

/// Error type for Redis backend operations.
///
/// Wraps errors from the underlying [`redis`] crate. You typically don't
/// handle this directly: it appears when building with an invalid
/// connection URL, on the first operation when Redis is unreachable (the
/// connection is lazy), or when the server returns an error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error from the underlying Redis client.
    ///
    /// Includes connection failures, protocol errors, authentication
    /// failures, and command execution errors.
    #[error("Redis backend error: {0}")]
    Redis(#[from] RedisError),
}

impl From<Error> for BackendError {
    fn from(error: Error) -> Self {
        Self::ConnectionError(Box::new(error))
    }
}
