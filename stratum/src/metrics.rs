//! Metrics declaration and recording helpers.

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Track number of L1 cache hit events.
    pub static ref CACHE_HIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "stratum_cache_hit_count",
            "Total number of first-level cache hits."
        );
        "stratum_cache_hit_count"
    };
    /// Track number of L1 cache miss events.
    pub static ref CACHE_MISS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "stratum_cache_miss_count",
            "Total number of first-level cache misses."
        );
        "stratum_cache_miss_count"
    };
    /// Track number of entries reclaimed by the expiration sweeper.
    pub static ref SWEEPER_EVICTIONS: &'static str = {
        metrics::describe_counter!(
            "stratum_sweeper_evictions_total",
            "Total number of entries reclaimed by the expiration sweeper."
        );
        "stratum_sweeper_evictions_total"
    };
    /// Track number of serialization pipeline batches flushed.
    pub static ref PIPELINE_BATCHES: &'static str = {
        metrics::describe_counter!(
            "stratum_pipeline_batches_total",
            "Total number of serialization batches flushed."
        );
        "stratum_pipeline_batches_total"
    };
    /// Track number of entries processed by the serialization pipeline.
    pub static ref PIPELINE_ITEMS: &'static str = {
        metrics::describe_counter!(
            "stratum_pipeline_items_total",
            "Total number of entries serialized and fingerprinted."
        );
        "stratum_pipeline_items_total"
    };
    /// Track number of backplane messages published.
    pub static ref BACKPLANE_PUBLISHED: &'static str = {
        metrics::describe_counter!(
            "stratum_backplane_published_total",
            "Total number of invalidation messages published."
        );
        "stratum_backplane_published_total"
    };
    /// Track number of backplane messages applied to the local store.
    pub static ref BACKPLANE_APPLIED: &'static str = {
        metrics::describe_counter!(
            "stratum_backplane_applied_total",
            "Total number of peer invalidation messages applied locally."
        );
        "stratum_backplane_applied_total"
    };
    /// Track number of backplane messages dropped (loopback, mismatched
    /// prefix, or guarded).
    pub static ref BACKPLANE_DROPPED: &'static str = {
        metrics::describe_counter!(
            "stratum_backplane_dropped_total",
            "Total number of inbound invalidation messages dropped."
        );
        "stratum_backplane_dropped_total"
    };
    /// Track number of second-level read-through hits.
    pub static ref L2_READ_THROUGH_HITS: &'static str = {
        metrics::describe_counter!(
            "stratum_l2_read_through_hits_total",
            "Total number of misses served by the second-level store."
        );
        "stratum_l2_read_through_hits_total"
    };
}

/// Records an L1 hit.
///
/// When the `metrics` feature is disabled this function is a no-op and
/// will be eliminated by the compiler; the same holds for the other
/// helpers below.
#[inline]
pub(crate) fn record_hit() {
    #[cfg(feature = "metrics")]
    metrics::counter!(*CACHE_HIT_COUNTER).increment(1);
}

/// Records an L1 miss.
#[inline]
pub(crate) fn record_miss() {
    #[cfg(feature = "metrics")]
    metrics::counter!(*CACHE_MISS_COUNTER).increment(1);
}

/// Records sweeper reclamations.
#[inline]
pub(crate) fn record_sweeper_evictions(_count: u64) {
    #[cfg(feature = "metrics")]
    if _count > 0 {
        metrics::counter!(*SWEEPER_EVICTIONS).increment(_count);
    }
}

/// Records one flushed pipeline batch of the given size.
#[inline]
pub(crate) fn record_pipeline_batch(_items: u64) {
    #[cfg(feature = "metrics")]
    {
        metrics::counter!(*PIPELINE_BATCHES).increment(1);
        metrics::counter!(*PIPELINE_ITEMS).increment(_items);
    }
}

/// Records one published invalidation message.
#[inline]
pub(crate) fn record_published() {
    #[cfg(feature = "metrics")]
    metrics::counter!(*BACKPLANE_PUBLISHED).increment(1);
}

/// Records one applied peer invalidation.
#[inline]
pub(crate) fn record_applied() {
    #[cfg(feature = "metrics")]
    metrics::counter!(*BACKPLANE_APPLIED).increment(1);
}

/// Records one dropped inbound message.
#[inline]
pub(crate) fn record_dropped() {
    #[cfg(feature = "metrics")]
    metrics::counter!(*BACKPLANE_DROPPED).increment(1);
}

/// Records one read-through hit against the second level.
#[inline]
pub(crate) fn record_l2_hit() {
    #[cfg(feature = "metrics")]
    metrics::counter!(*L2_READ_THROUGH_HITS).increment(1);
}
