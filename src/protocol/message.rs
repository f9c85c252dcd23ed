//! Structured-text bodies carried inside envelopes.
//!
//! Call bodies are always JSON `{args, kwargs}` regardless of the
//! envelope's content-type tag; the tag negotiates only how the *result*
//! payload inside [`ReplyBody`] is encoded.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Body of a call envelope: positional and named arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallBody {
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,

    /// Named arguments.
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl CallBody {
    /// Build a body with positional arguments only.
    pub fn positional(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Map::new(),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Body of a reply envelope: a tagged success-or-failure structure.
///
/// `payload` is produced by (and fed back through) the serializer that
/// matches the envelope's content-type tag; this struct never interprets
/// it. Failure replies carry a stable `error_kind` plus a message, which
/// the client re-hydrates into [`Error::Remote`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyBody {
    pub is_error: bool,

    #[serde(default)]
    pub error_kind: String,

    #[serde(default)]
    pub error_message: String,

    #[serde(default)]
    pub payload: Vec<u8>,
}

impl ReplyBody {
    pub fn success(payload: Bytes) -> Self {
        Self {
            is_error: false,
            error_kind: String::new(),
            error_message: String::new(),
            payload: payload.to_vec(),
        }
    }

    pub fn failure(err: &Error) -> Self {
        Self {
            is_error: true,
            error_kind: err.kind().to_owned(),
            error_message: err.message(),
            payload: Vec::new(),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn call_body_fields_default_when_absent() {
        // ---
        let body = CallBody::decode(b"{}").unwrap();
        assert!(body.args.is_empty());
        assert!(body.kwargs.is_empty());
    }

    #[test]
    fn call_body_keeps_argument_order() {
        // ---
        let body = CallBody::positional(vec![json!(1), json!("two")]);
        let decoded = CallBody::decode(&body.encode().unwrap()).unwrap();
        assert_eq!(decoded.args, vec![json!(1), json!("two")]);
    }

    #[test]
    fn failure_reply_carries_kind_and_message() {
        // ---
        let reply = ReplyBody::failure(&Error::remote("ValueError", "bad input"));
        let decoded = ReplyBody::decode(&reply.encode().unwrap()).unwrap();
        assert!(decoded.is_error);
        assert_eq!(decoded.error_kind, "ValueError");
        assert_eq!(decoded.error_message, "bad input");
        assert!(decoded.payload.is_empty());
    }
}
