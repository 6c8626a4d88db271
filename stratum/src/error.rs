//! Error types for cache operations.

use std::time::Duration;

use thiserror::Error;

use stratum_backend::BackendError;
use stratum_core::ConfigError;

/// Boxed error type carried by caller-supplied value factories.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced to cache callers.
///
/// The cache prefers availability over strict consistency: remote-store,
/// backplane and serialization failures never appear here. What does:
///
/// - a `get_or_load` that could not acquire the per-key lock in time;
/// - a value factory that failed (propagated unchanged);
/// - configuration or backend failures at construction time.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The per-key factory lock could not be acquired within the budget.
    ///
    /// Another caller's factory is still running for this key. The
    /// in-flight factory is unaffected; its value will still be installed.
    #[error("timed out after {waited:?} waiting for the value factory lock on key `{key}`")]
    FactoryLockTimeout {
        /// The contended key.
        key: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The caller-supplied value factory failed.
    ///
    /// The error is propagated unchanged; no entry was installed and the
    /// per-key lock has been released.
    #[error("value factory failed: {0}")]
    Factory(#[source] BoxError),

    /// Invalid configuration, fatal at construction time.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A backend failed while the cache was being constructed.
    ///
    /// After construction, backend failures are logged and swallowed;
    /// only the initial backplane subscription surfaces here.
    #[error(transparent)]
    Backend(#[from] BackendError),
}
