//! The invalidation backplane: wire record and transport trait.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::BackendResult;

/// Stream of decoded inbound invalidation messages.
pub type MessageStream = BoxStream<'static, InvalidationMessage>;

/// Wire record exchanged on the backplane.
///
/// Serialized as a single compact JSON document. The sender's
/// `instance_id` travels in every message precisely so senders can ignore
/// their own echoes without broker-side filtering. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationMessage {
    /// Logical namespace of the sending cache.
    pub application_cache_prefix: String,
    /// Identity of the sending cache instance.
    pub instance_id: String,
    /// The affected key, or a pattern when `is_pattern` is set.
    pub key: String,
    /// Whether `key` is a pattern.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_pattern: bool,
    /// Content fingerprint of the value the sender just established.
    ///
    /// Absent for pattern deletes and for removals that raced ahead of
    /// the serialization pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Informational send time, unix-epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl InvalidationMessage {
    /// Encodes the message as its JSON wire form.
    pub fn to_json(&self) -> BackendResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a message from its JSON wire form.
    pub fn from_json(payload: &str) -> BackendResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Publish/subscribe transport for invalidation messages.
///
/// Never a data plane: only invalidation records travel here. Delivery is
/// whatever the underlying transport provides (at-most-once or
/// at-least-once); receivers tolerate duplicates idempotently.
///
/// # Dyn-Compatibility
///
/// The trait is dyn-compatible and typically consumed as
/// `Arc<dyn Backplane>`.
#[async_trait]
pub trait Backplane: Send + Sync {
    /// Publishes one message on `channel`.
    async fn publish(&self, channel: &str, message: &InvalidationMessage) -> BackendResult<()>;

    /// Subscribes to `channel`, returning the stream of decoded inbound
    /// messages.
    ///
    /// Implementations drop undecodable payloads after logging them; the
    /// stream ends when the underlying connection closes.
    async fn subscribe(&self, channel: &str) -> BackendResult<MessageStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip() {
        let message = InvalidationMessage {
            application_cache_prefix: "app".to_owned(),
            instance_id: "instance-1".to_owned(),
            key: "user:42".to_owned(),
            is_pattern: false,
            fingerprint: Some("abcd".to_owned()),
            timestamp: Some(1_700_000_000_000),
        };
        let json = message.to_json().unwrap();
        assert_eq!(InvalidationMessage::from_json(&json).unwrap(), message);
    }

    #[test]
    fn wire_field_names_are_camel_case() {
        let message = InvalidationMessage {
            application_cache_prefix: "app".to_owned(),
            instance_id: "i".to_owned(),
            key: "k".to_owned(),
            is_pattern: true,
            fingerprint: None,
            timestamp: None,
        };
        let json = message.to_json().unwrap();
        assert!(json.contains("\"applicationCachePrefix\""));
        assert!(json.contains("\"instanceId\""));
        assert!(json.contains("\"isPattern\""));
        assert!(!json.contains("fingerprint"), "absent fields are omitted");
    }

    #[test]
    fn optional_fields_default_on_decode() {
        let json = r#"{"applicationCachePrefix":"app","instanceId":"i","key":"k"}"#;
        let message = InvalidationMessage::from_json(json).unwrap();
        assert!(!message.is_pattern);
        assert!(message.fingerprint.is_none());
        assert!(message.timestamp.is_none());
    }
}
