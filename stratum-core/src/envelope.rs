//! The binary record stored in the second-level cache.
//!
//! An [`Envelope`] packages a serialized payload together with the metadata
//! needed to reconstruct a [`CacheEntry`](crate::entry::CacheEntry) in
//! another process: key, TTL, creation time, expiration deadlines, content
//! fingerprint and a compression flag. Envelopes are bincode-encoded; the
//! payload inside is gzip-compressed when it crossed the configured
//! compression threshold at write time.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Raw;

/// Error type for envelope encoding, decoding and payload codec failures.
///
/// Any variant produced while parsing bytes read back from the remote store
/// means the envelope is corrupt; read-through treats that as a cache miss.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The envelope frame failed to decode.
    #[error("corrupt envelope: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// The envelope frame failed to encode.
    #[error("envelope encoding failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// The payload failed to serialize or deserialize.
    #[error("payload codec error: {0}")]
    Payload(#[from] serde_json::Error),

    /// Compression or decompression of the payload failed.
    #[error("payload compression error: {0}")]
    Compression(#[from] std::io::Error),

    /// The entry holds neither an encoder nor an already-serialized form.
    ///
    /// Happens only for entries created under `NotificationMode::None`,
    /// which are never supposed to reach the serialization step.
    #[error("entry has no payload encoder")]
    MissingEncoder,
}

/// Metadata-plus-payload record mirrored to the second-level store.
///
/// Wall-clock fields are unix-epoch milliseconds. `kill_tick_ms` is the
/// writer's monotonic deadline and is carried for completeness; readers in
/// other processes re-derive their own monotonic deadline from
/// `absolute_expire_at_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Cache key the payload was stored under.
    pub key: String,
    /// Configured lifetime of the entry in milliseconds.
    pub ttl_ms: u64,
    /// When the entry was created.
    pub created_at_ms: i64,
    /// Wall-clock staleness deadline.
    pub absolute_expire_at_ms: i64,
    /// The writer's monotonic deadline at write time.
    pub kill_tick_ms: u64,
    /// Hex digest of the (uncompressed) payload bytes.
    pub fingerprint: String,
    /// Whether `payload` is gzip-compressed.
    pub compressed: bool,
    /// Serialized payload, compressed when `compressed` is set.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Encodes the envelope into its wire form.
    pub fn to_bytes(&self) -> Result<Raw, EnvelopeError> {
        let encoded = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        Ok(Bytes::from(encoded))
    }

    /// Decodes an envelope from its wire form.
    ///
    /// Trailing bytes after the frame are rejected as corruption.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let (envelope, read): (Self, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        if read != bytes.len() {
            return Err(EnvelopeError::Decode(
                bincode::error::DecodeError::Other("trailing bytes after envelope"),
            ));
        }
        Ok(envelope)
    }

    /// Returns the payload in its uncompressed form.
    pub fn decoded_payload(&self) -> Result<Vec<u8>, EnvelopeError> {
        if self.compressed {
            decompress(&self.payload)
        } else {
            Ok(self.payload.clone())
        }
    }
}

/// Gzip-compresses payload bytes.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompresses gzip payload bytes.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(compressed: bool, payload: Vec<u8>) -> Envelope {
        Envelope {
            key: "user:42".to_owned(),
            ttl_ms: 300_000,
            created_at_ms: 1_700_000_000_000,
            absolute_expire_at_ms: 1_700_000_300_000,
            kill_tick_ms: 12_345,
            fingerprint: "9e107d9d372bb6826bd81d3542a419d6".to_owned(),
            compressed,
            payload,
        }
    }

    #[test]
    fn round_trip_preserves_all_fields() {
        let envelope = sample(false, b"{\"name\":\"alice\"}".to_vec());
        let bytes = envelope.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn compressed_payload_round_trips() {
        let original = vec![7u8; 4096];
        let envelope = sample(true, compress(&original).unwrap());
        let bytes = envelope.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes).unwrap();
        assert!(decoded.compressed);
        assert_eq!(decoded.decoded_payload().unwrap(), original);
    }

    #[test]
    fn compression_shrinks_repetitive_payloads() {
        let original = vec![0u8; 8192];
        let compressed = compress(&original).unwrap();
        assert!(
            compressed.len() < original.len(),
            "expected {} < {}",
            compressed.len(),
            original.len()
        );
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        assert!(Envelope::from_bytes(b"definitely not an envelope").is_err());
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        let bytes = sample(false, b"payload".to_vec()).to_bytes().unwrap();
        assert!(Envelope::from_bytes(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn corrupt_compressed_payload_is_rejected() {
        let envelope = sample(true, b"not gzip".to_vec());
        assert!(envelope.decoded_payload().is_err());
    }
}
