//! The unit stored in the first-level cache.
//!
//! A [`CacheEntry`] pairs an opaque typed payload with its TTL metadata,
//! content fingerprint and serialized form. Entries become visible in L1
//! immediately on insert; the fingerprint and serialized form arrive later,
//! once the serialization pipeline has processed the entry. `is_expired`
//! compares against a monotonic deadline so wall-clock jumps never revive
//! or kill an entry early.

use std::any::Any;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::envelope::{self, Envelope, EnvelopeError};
use crate::{Raw, epoch_ms};

/// Process-wide origin for monotonic deadline arithmetic.
///
/// All monotonic ticks are milliseconds elapsed since the first call in
/// this process. The absolute value is meaningless outside the process.
fn mono_origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

/// Current monotonic tick in milliseconds.
pub fn mono_now_ms() -> u64 {
    mono_origin().elapsed().as_millis() as u64
}

type EncodeFn = Arc<dyn Fn() -> Result<Raw, EnvelopeError> + Send + Sync>;

/// One cached value and its metadata.
///
/// The payload is type-erased; [`CacheEntry::typed`] recovers it by
/// downcast at the read site. A mismatched type reads as absent rather
/// than failing the call.
///
/// Exactly one entry is current per key in an L1 map; replacement installs
/// a fresh entry. The fingerprint is write-once: it only changes by
/// replacing the entry.
pub struct CacheEntry {
    key: String,
    value: Arc<dyn Any + Send + Sync>,
    created_at_ms: i64,
    absolute_expire_at_ms: AtomicI64,
    kill_tick_ms: AtomicU64,
    ttl: Duration,
    fingerprint: OnceLock<String>,
    serialized: OnceLock<Raw>,
    size_bytes: AtomicUsize,
    encode: Option<EncodeFn>,
}

impl CacheEntry {
    /// Creates an entry for a freshly written value.
    ///
    /// Both deadlines are computed immediately so `is_expired` is correct
    /// before serialization completes. The payload encoder is captured
    /// here so the pipeline can serialize without knowing the value type.
    pub fn new<T>(key: impl Into<String>, value: T, ttl: Duration) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        let value = Arc::new(value);
        let to_encode = Arc::clone(&value);
        let encode: EncodeFn = Arc::new(move || {
            let bytes = serde_json::to_vec(&*to_encode)?;
            Ok(Bytes::from(bytes))
        });
        let ttl_ms = ttl.as_millis() as u64;
        let created_at_ms = epoch_ms();
        CacheEntry {
            key: key.into(),
            value,
            created_at_ms,
            absolute_expire_at_ms: AtomicI64::new(created_at_ms + ttl_ms as i64),
            kill_tick_ms: AtomicU64::new(mono_now_ms() + ttl_ms),
            ttl,
            fingerprint: OnceLock::new(),
            serialized: OnceLock::new(),
            size_bytes: AtomicUsize::new(0),
            encode: Some(encode),
        }
    }

    /// Reconstructs an entry from envelope bytes read out of the remote
    /// store.
    ///
    /// Wall-clock deadlines are taken from the envelope, not recomputed.
    /// The monotonic deadline is re-derived from the envelope's remaining
    /// wall TTL, since the writer's monotonic origin has no meaning here.
    /// Fails with a corrupt-envelope error on any parse, decompression or
    /// payload decode failure.
    pub fn from_envelope_bytes<T>(bytes: &[u8]) -> Result<Self, EnvelopeError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let envelope = Envelope::from_bytes(bytes)?;
        let payload = envelope.decoded_payload()?;
        let value: T = serde_json::from_slice(&payload)?;

        let remaining_ms = (envelope.absolute_expire_at_ms - epoch_ms()).max(0) as u64;
        let entry = CacheEntry {
            key: envelope.key,
            value: Arc::new(value),
            created_at_ms: envelope.created_at_ms,
            absolute_expire_at_ms: AtomicI64::new(envelope.absolute_expire_at_ms),
            kill_tick_ms: AtomicU64::new(mono_now_ms() + remaining_ms),
            ttl: Duration::from_millis(envelope.ttl_ms),
            fingerprint: OnceLock::new(),
            serialized: OnceLock::new(),
            size_bytes: AtomicUsize::new(payload.len()),
            encode: None,
        };
        let _ = entry.fingerprint.set(envelope.fingerprint);
        let _ = entry.serialized.set(Bytes::from(payload));
        Ok(entry)
    }

    /// Serializes the payload, records its size, computes the content
    /// fingerprint, compresses past the threshold and returns the encoded
    /// envelope for the second-level mirror.
    ///
    /// Idempotent with respect to the fingerprint and serialized form:
    /// both are write-once, and rerunning reuses them.
    pub fn update_fingerprint(&self, compression_threshold: usize) -> Result<Raw, EnvelopeError> {
        let payload = match self.serialized.get() {
            Some(bytes) => bytes.clone(),
            None => {
                let encode = self.encode.as_ref().ok_or(EnvelopeError::MissingEncoder)?;
                let bytes = encode()?;
                self.serialized.get_or_init(|| bytes).clone()
            }
        };
        self.size_bytes.store(payload.len(), Ordering::Relaxed);

        let digest = format!("{:x}", md5::compute(&payload));
        let fingerprint = self.fingerprint.get_or_init(|| digest).clone();

        let compressed = payload.len() >= compression_threshold;
        let body = if compressed {
            envelope::compress(&payload)?
        } else {
            payload.to_vec()
        };

        let envelope = Envelope {
            key: self.key.clone(),
            ttl_ms: self.ttl.as_millis() as u64,
            created_at_ms: self.created_at_ms,
            absolute_expire_at_ms: self.absolute_expire_at_ms.load(Ordering::Relaxed),
            kill_tick_ms: self.kill_tick_ms.load(Ordering::Relaxed),
            fingerprint,
            compressed,
            payload: body,
        };
        envelope.to_bytes()
    }

    /// Slides both deadlines forward by the configured TTL.
    ///
    /// Called on read hits under the LRU eviction policy.
    pub fn refresh(&self) {
        let ttl_ms = self.ttl.as_millis() as u64;
        self.absolute_expire_at_ms
            .store(epoch_ms() + ttl_ms as i64, Ordering::Relaxed);
        self.kill_tick_ms
            .store(mono_now_ms() + ttl_ms, Ordering::Relaxed);
    }

    /// Whether the entry is past its monotonic deadline.
    ///
    /// Authoritative for liveness; the wall-clock deadline exists for the
    /// envelope and for observability.
    pub fn is_expired(&self) -> bool {
        mono_now_ms() > self.kill_tick_ms.load(Ordering::Relaxed)
    }

    /// Recovers the payload as its concrete type.
    ///
    /// Returns `None` when the stored type differs from `T`.
    pub fn typed<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    /// The cache key this entry is stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Insertion wall-time in unix-epoch milliseconds.
    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    /// Current wall-clock staleness deadline in unix-epoch milliseconds.
    pub fn absolute_expire_at_ms(&self) -> i64 {
        self.absolute_expire_at_ms.load(Ordering::Relaxed)
    }

    /// Configured lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Content digest of the serialized payload, if serialization has
    /// completed.
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.get().map(String::as_str)
    }

    /// Serialized payload bytes, if serialization has completed.
    pub fn serialized(&self) -> Option<&Raw> {
        self.serialized.get()
    }

    /// Length of the serialized payload in bytes; zero until serialization
    /// completes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("created_at_ms", &self.created_at_ms)
            .field("absolute_expire_at_ms", &self.absolute_expire_at_ms())
            .field("ttl", &self.ttl)
            .field("fingerprint", &self.fingerprint())
            .field("size_bytes", &self.size_bytes())
            .finish_non_exhaustive()
    }
}
