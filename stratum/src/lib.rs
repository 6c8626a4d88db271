#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// The public cache façade and its builder.
pub mod cache;

/// Error types for cache operations.
///
/// Defines [`CacheError`], the only errors that reach callers:
/// factory-lock timeouts, factory failures, and construction-time
/// configuration or backend failures. Everything else (remote store,
/// backplane, serialization) is logged and swallowed.
pub mod error;

/// Per-key lock table backing single-flight loads.
pub mod lock;

/// Metrics declaration and recording helpers.
///
/// Active when the `metrics` feature is enabled; no-ops otherwise.
pub mod metrics;

/// The L2 mirror: write-through, delete-through and read-through against
/// the remote store.
pub(crate) mod mirror;

/// The asynchronous serialization pipeline.
pub mod pipeline;

/// The backplane adapter: outbound publication of change events and
/// inbound application of peer invalidations.
pub(crate) mod backplane;

/// The concurrent L1 store.
pub mod store;

pub use cache::{TieredCache, TieredCacheBuilder};
pub use error::{BoxError, CacheError};
pub use store::CacheStatistics;

pub use stratum_backend::{Backplane, BackendError, InvalidationMessage, RemoteStore};
pub use stratum_core::{
    CacheConfig, CacheEntry, ChangeListener, ConfigError, EntryEvent, EntryEventKind,
    EvictionPolicy, KeyPattern, NotificationMode, Raw,
};
