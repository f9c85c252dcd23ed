// src/serializer.rs

//! Pluggable result codecs keyed by content-type tag.
//!
//! The *call* envelope body is always structured text; only the *result*
//! payload inside a reply is negotiated. The dispatcher encodes a handler's
//! return value with the serializer matching the request's content type,
//! and the invoker decodes the reply payload with the serializer matching
//! the reply's content type. Lookup is first-registered-match-wins; no
//! match is a typed [`Error::SerializationMismatch`].

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::protocol::{CONTENT_TYPE_JSON, CONTENT_TYPE_RAW};

/// A capability-tagged codec converting a result value to and from bytes.
pub trait Serializer: Send + Sync {
    /// Content-type tags this codec accepts. The empty string stands for
    /// an envelope carrying no tag at all.
    fn content_types(&self) -> &[&str];

    fn serialize(&self, value: &Value) -> Result<Bytes>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Value>;
}

/// Ordered serializer registry; first registered match wins.
///
/// Instance-owned, never process-wide: each client and server carries its
/// own registry so multiple instances stay independent.
pub struct SerializerRegistry {
    entries: RwLock<Vec<Arc<dyn Serializer>>>,
}

impl SerializerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Registry pre-loaded with the built-in raw and JSON codecs.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.add(Arc::new(RawSerializer));
        registry.add(Arc::new(JsonSerializer));
        registry
    }

    /// Append a codec; it is consulted after everything registered before it.
    pub fn add(&self, serializer: Arc<dyn Serializer>) {
        self.write_entries().push(serializer);
    }

    /// First registered serializer whose tags contain `tag`. An absent tag
    /// matches codecs that list the empty string.
    pub fn resolve(&self, tag: Option<&str>) -> Option<Arc<dyn Serializer>> {
        let tag = tag.unwrap_or("");

        self.read_entries()
            .iter()
            .find(|s| s.content_types().contains(&tag))
            .cloned()
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, Vec<Arc<dyn Serializer>>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, Vec<Arc<dyn Serializer>>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Raw passthrough codec.
///
/// Matches `application/octet-stream` and envelopes with no tag. Values
/// must be strings; the bytes are the string's UTF-8, untouched.
pub struct RawSerializer;

impl Serializer for RawSerializer {
    fn content_types(&self) -> &[&str] {
        &[CONTENT_TYPE_RAW, ""]
    }

    fn serialize(&self, value: &Value) -> Result<Bytes> {
        match value {
            Value::String(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            other => Err(Error::Protocol(format!(
                "raw serializer expects a string payload, got {other}"
            ))),
        }
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::Protocol(format!("raw payload is not valid UTF-8: {e}")))?;
        Ok(Value::String(text.to_owned()))
    }
}

/// Structured-text codec for `application/json`.
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn content_types(&self) -> &[&str] {
        &[CONTENT_TYPE_JSON]
    }

    fn serialize(&self, value: &Value) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn builtins_cover_json_raw_and_absent_tags() {
        // ---
        let registry = SerializerRegistry::with_builtins();

        assert!(registry.resolve(Some(CONTENT_TYPE_JSON)).is_some());
        assert!(registry.resolve(Some(CONTENT_TYPE_RAW)).is_some());
        assert!(registry.resolve(None).is_some());
        assert!(registry.resolve(Some("binary-x")).is_none());
    }

    #[test]
    fn first_registered_match_wins() {
        // ---
        struct Shadow;
        impl Serializer for Shadow {
            fn content_types(&self) -> &[&str] {
                &[CONTENT_TYPE_JSON]
            }
            fn serialize(&self, _value: &Value) -> Result<Bytes> {
                Ok(Bytes::from_static(b"shadow"))
            }
            fn deserialize(&self, _bytes: &[u8]) -> Result<Value> {
                Ok(Value::Null)
            }
        }

        let registry = SerializerRegistry::new();
        registry.add(Arc::new(Shadow));
        registry.add(Arc::new(JsonSerializer));

        let resolved = registry.resolve(Some(CONTENT_TYPE_JSON)).unwrap();
        assert_eq!(
            resolved.serialize(&json!(1)).unwrap(),
            Bytes::from_static(b"shadow")
        );
    }

    #[test]
    fn json_round_trip() {
        // ---
        let codec = JsonSerializer;
        let value = json!({"a": [1, 2], "b": "x"});
        let bytes = codec.serialize(&value).unwrap();
        assert_eq!(codec.deserialize(&bytes).unwrap(), value);
    }

    #[test]
    fn raw_rejects_non_string_values() {
        // ---
        let codec = RawSerializer;
        assert!(codec.serialize(&json!(42)).is_err());
        assert!(codec.serialize(&Value::Null).is_err());
        assert_eq!(
            codec.serialize(&json!("hi")).unwrap(),
            Bytes::from_static(b"hi")
        );
        assert_eq!(codec.deserialize(b"hi").unwrap(), json!("hi"));
    }
}
