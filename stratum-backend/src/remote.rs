//! The remote key/value store trait consumed by the second-level mirror.

use std::time::Duration;

use async_trait::async_trait;

use stratum_core::Raw;

use crate::error::BackendResult;

/// Narrow client interface over the shared remote store.
///
/// The cache engine consumes exactly these five primitives; everything
/// else about the remote deployment (connection pooling, clustering,
/// retries) is the implementation's business. Keys arrive already
/// prefixed with the application cache namespace.
///
/// Values are opaque envelope bytes produced by the serialization
/// pipeline; the store never inspects them.
///
/// # Dyn-Compatibility
///
/// The trait is dyn-compatible and typically consumed as
/// `Arc<dyn RemoteStore>`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// Returns `Ok(None)` on miss.
    async fn get(&self, key: &str) -> BackendResult<Option<Raw>>;

    /// Reads many keys in one round trip.
    ///
    /// The result is aligned to `keys`: position `i` holds the value for
    /// `keys[i]`, or `None` on miss.
    async fn mget(&self, keys: &[String]) -> BackendResult<Vec<Option<Raw>>>;

    /// Writes `value` under `key` with the given time-to-live.
    async fn set(&self, key: &str, value: Raw, ttl: Duration) -> BackendResult<()>;

    /// Deletes the given keys; returns how many existed.
    async fn del(&self, keys: &[String]) -> BackendResult<u64>;

    /// Deletes every key matching the glob `pattern` server-side; returns
    /// how many were removed.
    ///
    /// The pattern uses the same `*`-only grammar as local pattern
    /// removal, so implementations can hand it to the store's native
    /// MATCH support unchanged.
    async fn del_pattern(&self, pattern: &str) -> BackendResult<u64>;
}
