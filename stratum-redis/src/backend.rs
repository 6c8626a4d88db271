//! Redis backend implementation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use redis::{Client, Script, aio::ConnectionManager};
use stratum_backend::{
    Backplane, BackendError, BackendResult, InvalidationMessage, MessageStream, RemoteStore,
};
use stratum_core::Raw;
use tokio::sync::OnceCell;
use tracing::{trace, warn};

use crate::error::Error;

/// Deletes every key matching ARGV[1] in one server-side pass.
///
/// SCAN bounds memory on the server; UNLINK reclaims asynchronously.
const UNLINK_PATTERN_SCRIPT: &str = r#"
local cursor = "0"
local removed = 0
repeat
    local reply = redis.call("SCAN", cursor, "MATCH", ARGV[1], "COUNT", 100)
    cursor = reply[1]
    for _, key in ipairs(reply[2]) do
        removed = removed + redis.call("UNLINK", key)
    end
until cursor == "0"
return removed
"#;

/// Remote store and invalidation backplane powered by Redis.
///
/// One backend instance serves both roles: envelope storage for the
/// second-level mirror ([`RemoteStore`]) and pub/sub transport for
/// invalidation messages ([`Backplane`]). Storage operations share a
/// multiplexed [`ConnectionManager`]; each subscription gets its own
/// pub/sub connection, as Redis requires.
///
/// # Examples
///
/// ```no_run
/// use stratum_redis::RedisBackend;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = RedisBackend::builder()
///     .server("redis://localhost:6379/")
///     .build()?;
/// # Ok(())
/// # }
/// ```
///
/// # Caveats
///
/// - The connection is established lazily on first use; constructing the
///   backend never blocks.
/// - Pub/sub delivery is at-most-once. A subscriber that disconnects
///   misses messages; the cache's fingerprint guards keep that safe
///   (stale entries simply live until their TTL).
#[derive(Clone)]
pub struct RedisBackend {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    unlink_pattern: Script,
}

impl RedisBackend {
    /// Creates a backend against `redis://127.0.0.1/`.
    ///
    /// # Errors
    ///
    /// Returns [`Error`] if the connection URL is invalid. Actual
    /// connection errors occur lazily on first operation.
    pub fn new() -> Result<Self, Error> {
        Self::builder().build()
    }

    /// Creates a new builder with default settings.
    #[must_use]
    pub fn builder() -> RedisBackendBuilder {
        RedisBackendBuilder::default()
    }

    /// Returns the shared connection manager, establishing it on first
    /// call.
    pub async fn connection(&self) -> Result<&ConnectionManager, BackendError> {
        trace!("get connection manager");
        let manager = self
            .connection
            .get_or_try_init(|| {
                trace!("initialize new redis connection manager");
                self.client.get_connection_manager()
            })
            .await
            .map_err(Error::from)?;
        Ok(manager)
    }
}

/// Builder for [`RedisBackend`].
pub struct RedisBackendBuilder {
    connection_info: String,
}

impl Default for RedisBackendBuilder {
    fn default() -> Self {
        Self {
            connection_info: "redis://127.0.0.1/".to_owned(),
        }
    }
}

impl RedisBackendBuilder {
    /// Sets the Redis server connection URL.
    ///
    /// Format: `redis://[<username>][:<password>@]<host>[:<port>][/<database>]`.
    /// Default: `redis://127.0.0.1/`.
    pub fn server(mut self, connection_info: impl Into<String>) -> Self {
        self.connection_info = connection_info.into();
        self
    }

    /// Builds the backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Redis`] if the connection URL is invalid.
    pub fn build(self) -> Result<RedisBackend, Error> {
        Ok(RedisBackend {
            client: Client::open(self.connection_info)?,
            connection: OnceCell::new(),
            unlink_pattern: Script::new(UNLINK_PATTERN_SCRIPT),
        })
    }
}

#[async_trait]
impl RemoteStore for RedisBackend {
    async fn get(&self, key: &str) -> BackendResult<Option<Raw>> {
        let mut con = self.connection().await?.clone();
        let data: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(Error::from)?;
        Ok(data.map(Bytes::from))
    }

    async fn mget(&self, keys: &[String]) -> BackendResult<Vec<Option<Raw>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut con = self.connection().await?.clone();
        let data: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut con)
            .await
            .map_err(Error::from)?;
        Ok(data.into_iter().map(|value| value.map(Bytes::from)).collect())
    }

    async fn set(&self, key: &str, value: Raw, ttl: Duration) -> BackendResult<()> {
        let mut con = self.connection().await?.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value.as_ref())
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async::<()>(&mut con)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> BackendResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut con = self.connection().await?.clone();
        let removed: u64 = redis::cmd("UNLINK")
            .arg(keys)
            .query_async(&mut con)
            .await
            .map_err(Error::from)?;
        Ok(removed)
    }

    async fn del_pattern(&self, pattern: &str) -> BackendResult<u64> {
        let mut con = self.connection().await?.clone();
        let removed: u64 = self
            .unlink_pattern
            .arg(pattern)
            .invoke_async(&mut con)
            .await
            .map_err(Error::from)?;
        trace!(pattern, removed, "server-side pattern unlink");
        Ok(removed)
    }
}

#[async_trait]
impl Backplane for RedisBackend {
    async fn publish(&self, channel: &str, message: &InvalidationMessage) -> BackendResult<()> {
        let payload = message.to_json()?;
        let mut con = self.connection().await?.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<()>(&mut con)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> BackendResult<MessageStream> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(Error::from)?;
        pubsub.subscribe(channel).await.map_err(Error::from)?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(error) => {
                        warn!(%error, "undecodable backplane payload dropped");
                        return None;
                    }
                };
                match InvalidationMessage::from_json(&payload) {
                    Ok(message) => Some(message),
                    Err(error) => {
                        warn!(%error, "malformed invalidation message dropped");
                        None
                    }
                }
            })
            .boxed();
        Ok(stream)
    }
}
