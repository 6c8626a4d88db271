//! Change events emitted on observable entry transitions.

use std::sync::Arc;

use crate::epoch_ms;

/// What happened to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryEventKind {
    /// A value was written or replaced.
    AddOrUpdate,
    /// A value was removed explicitly (single key, pattern or clear).
    Remove,
    /// A value was reclaimed by the expiration sweeper.
    Expire,
}

/// One observable change to the cache.
///
/// For pattern removals and `clear`, a single aggregated event is emitted
/// with the pattern (or `"*"`) as the key and `is_pattern` set; the
/// individual matched keys produce no events of their own.
#[derive(Debug, Clone)]
pub struct EntryEvent {
    /// The affected key, or the pattern for aggregated removals.
    pub key: String,
    /// The kind of transition.
    pub kind: EntryEventKind,
    /// Content fingerprint of the affected entry, when known.
    pub fingerprint: Option<String>,
    /// Whether `key` is a pattern rather than a concrete key.
    pub is_pattern: bool,
    /// When the event was created, unix-epoch milliseconds.
    pub timestamp_ms: i64,
}

impl EntryEvent {
    /// Creates an event for a concrete key.
    pub fn new(key: impl Into<String>, kind: EntryEventKind, fingerprint: Option<String>) -> Self {
        EntryEvent {
            key: key.into(),
            kind,
            fingerprint,
            is_pattern: false,
            timestamp_ms: epoch_ms(),
        }
    }

    /// Creates an aggregated removal event for a pattern.
    pub fn pattern_remove(pattern: impl Into<String>) -> Self {
        EntryEvent {
            key: pattern.into(),
            kind: EntryEventKind::Remove,
            fingerprint: None,
            is_pattern: true,
            timestamp_ms: epoch_ms(),
        }
    }
}

/// User callback invoked on each observable entry change.
pub type ChangeListener = Arc<dyn Fn(&EntryEvent) + Send + Sync>;
