#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod config;
pub mod entry;
pub mod envelope;
pub mod event;
pub mod pattern;

pub use config::{
    CacheConfig, CacheConfigBuilder, ConfigError, EvictionPolicy, NotificationMode,
};
pub use entry::CacheEntry;
pub use envelope::{Envelope, EnvelopeError};
pub use event::{ChangeListener, EntryEvent, EntryEventKind};
pub use pattern::KeyPattern;

/// Raw byte data type used for serialized cache payloads and envelopes.
/// Using `Bytes` provides cheap reference-counted cloning.
pub type Raw = bytes::Bytes;

/// Current wall-clock time as unix-epoch milliseconds.
pub fn epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
