//! Cache configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::event::ChangeListener;

/// Configuration error, fatal at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `application_cache_prefix` was empty or missing.
    ///
    /// The prefix scopes the backplane channel and the remote keyspace;
    /// a cache without one cannot participate in either.
    #[error("application cache prefix must not be empty")]
    MissingPrefix,

    /// The second level was enabled without providing a remote store.
    #[error("second-level cache enabled but no remote store was provided")]
    MissingRemoteStore,
}

/// How read hits affect entry lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Read hits slide both deadlines forward by the TTL.
    #[default]
    Lru,
    /// Deadlines are fixed at write time and never refreshed.
    Fifo,
}

/// When (and whether) writes are serialized and change events emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationMode {
    /// Serialize on the pipeline; events fire once the fingerprint is known.
    #[default]
    Async,
    /// Serialize inline at write time; events fire immediately.
    Sync,
    /// No serialization, no events, no mirroring.
    None,
}

/// Per-cache configuration value object.
///
/// Built through [`CacheConfig::builder`]; the only required field is the
/// application cache prefix.
#[derive(Clone)]
pub struct CacheConfig {
    /// Logical namespace; scopes the backplane channel and remote keys.
    pub application_cache_prefix: String,
    /// Stable identity of this process's cache, used to suppress loopback.
    pub instance_id: String,
    /// Period of the expiration sweeper.
    pub cleanup_interval: Duration,
    /// TTL used when the caller omits one.
    pub default_ttl: Duration,
    /// How read hits affect entry lifetime.
    pub eviction_policy: EvictionPolicy,
    /// When writes are serialized and change events emitted.
    pub notification_mode: NotificationMode,
    /// Serialized size at or above which payloads are compressed.
    pub compression_threshold: usize,
    /// Whether the remote store doubles as a second-level cache.
    pub use_remote_as_second_level: bool,
    /// User callback invoked on each observable entry change.
    pub value_change_listener: Option<ChangeListener>,
    /// Shard count of the key-lock pool.
    pub lock_pool_size: usize,
    /// Maximum time the serialization pipeline buffers a batch.
    pub flush_interval: Duration,
    /// Batch size that forces an early pipeline flush.
    pub batch_size: usize,
    /// Default budget for acquiring the per-key factory lock.
    pub max_factory_wait: Duration,
}

impl CacheConfig {
    /// Starts building a configuration for the given prefix.
    pub fn builder(application_cache_prefix: impl Into<String>) -> CacheConfigBuilder {
        CacheConfigBuilder::new(application_cache_prefix)
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("application_cache_prefix", &self.application_cache_prefix)
            .field("instance_id", &self.instance_id)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("default_ttl", &self.default_ttl)
            .field("eviction_policy", &self.eviction_policy)
            .field("notification_mode", &self.notification_mode)
            .field("compression_threshold", &self.compression_threshold)
            .field("use_remote_as_second_level", &self.use_remote_as_second_level)
            .field(
                "value_change_listener",
                &self.value_change_listener.as_ref().map(|_| "<listener>"),
            )
            .field("lock_pool_size", &self.lock_pool_size)
            .field("flush_interval", &self.flush_interval)
            .field("batch_size", &self.batch_size)
            .field("max_factory_wait", &self.max_factory_wait)
            .finish()
    }
}

/// Builder for [`CacheConfig`].
pub struct CacheConfigBuilder {
    application_cache_prefix: String,
    instance_id: Option<String>,
    cleanup_interval: Duration,
    default_ttl: Duration,
    eviction_policy: EvictionPolicy,
    notification_mode: NotificationMode,
    compression_threshold: usize,
    use_remote_as_second_level: bool,
    value_change_listener: Option<ChangeListener>,
    lock_pool_size: usize,
    flush_interval: Duration,
    batch_size: usize,
    max_factory_wait: Duration,
}

impl CacheConfigBuilder {
    fn new(application_cache_prefix: impl Into<String>) -> Self {
        CacheConfigBuilder {
            application_cache_prefix: application_cache_prefix.into(),
            instance_id: None,
            cleanup_interval: Duration::from_secs(1),
            default_ttl: Duration::from_secs(300),
            eviction_policy: EvictionPolicy::default(),
            notification_mode: NotificationMode::default(),
            compression_threshold: 1024,
            use_remote_as_second_level: false,
            value_change_listener: None,
            lock_pool_size: 7872,
            flush_interval: Duration::from_millis(35),
            batch_size: 100,
            max_factory_wait: Duration::from_secs(10),
        }
    }

    /// Overrides the generated instance identity.
    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Sets the expiration sweeper period. Default: 1 s.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Sets the TTL used when the caller omits one. Default: 5 min.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the eviction policy. Default: LRU.
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Sets the notification mode. Default: async.
    pub fn notification_mode(mut self, mode: NotificationMode) -> Self {
        self.notification_mode = mode;
        self
    }

    /// Sets the compression threshold in bytes. Default: 1 KiB.
    pub fn compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = threshold;
        self
    }

    /// Enables or disables the second-level cache. Default: disabled.
    pub fn use_remote_as_second_level(mut self, enabled: bool) -> Self {
        self.use_remote_as_second_level = enabled;
        self
    }

    /// Installs a change listener.
    pub fn value_change_listener(mut self, listener: ChangeListener) -> Self {
        self.value_change_listener = Some(listener);
        self
    }

    /// Sets the key-lock pool shard count. Default: 7872.
    pub fn lock_pool_size(mut self, size: usize) -> Self {
        self.lock_pool_size = size;
        self
    }

    /// Sets the pipeline flush interval. Default: 35 ms.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the pipeline batch size. Default: 100.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the default factory-lock wait budget. Default: 10 s.
    pub fn max_factory_wait(mut self, wait: Duration) -> Self {
        self.max_factory_wait = wait;
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingPrefix`] when the prefix is empty.
    pub fn build(self) -> Result<CacheConfig, ConfigError> {
        if self.application_cache_prefix.is_empty() {
            return Err(ConfigError::MissingPrefix);
        }
        Ok(CacheConfig {
            application_cache_prefix: self.application_cache_prefix,
            instance_id: self
                .instance_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            cleanup_interval: self.cleanup_interval,
            default_ttl: self.default_ttl,
            eviction_policy: self.eviction_policy,
            notification_mode: self.notification_mode,
            compression_threshold: self.compression_threshold,
            use_remote_as_second_level: self.use_remote_as_second_level,
            value_change_listener: self.value_change_listener,
            lock_pool_size: self.lock_pool_size.max(1),
            flush_interval: self.flush_interval,
            batch_size: self.batch_size.max(1),
            max_factory_wait: self.max_factory_wait,
        })
    }
}

/// Convenience alias used by listener installers.
pub fn listener<F>(f: F) -> ChangeListener
where
    F: Fn(&crate::event::EntryEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_prefix_is_rejected() {
        assert!(matches!(
            CacheConfig::builder("").build(),
            Err(ConfigError::MissingPrefix)
        ));
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = CacheConfig::builder("app").build().unwrap();
        assert_eq!(config.cleanup_interval, Duration::from_secs(1));
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert_eq!(config.eviction_policy, EvictionPolicy::Lru);
        assert_eq!(config.notification_mode, NotificationMode::Async);
        assert_eq!(config.lock_pool_size, 7872);
        assert!(!config.use_remote_as_second_level);
        assert!(!config.instance_id.is_empty());
    }

    #[test]
    fn distinct_builds_get_distinct_instance_ids() {
        let a = CacheConfig::builder("app").build().unwrap();
        let b = CacheConfig::builder("app").build().unwrap();
        assert_ne!(a.instance_id, b.instance_id);
    }
}
