use thiserror::Error;

/// Errors that can occur during RPC operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Call deadline expired. A best-effort cancellation has already been
    /// published by the time the caller sees this.
    #[error("call timed out")]
    Timeout,

    /// Remote handler failed; re-hydrated from the reply envelope.
    #[error("{kind}: {message}")]
    Remote { kind: String, message: String },

    /// No registered serializer accepts the payload's content-type tag.
    #[error("no serializer for content type {0:?}")]
    SerializationMismatch(String),

    /// Call target does not name a route.
    #[error("invalid call target {0:?}")]
    InvalidTarget(String),

    /// A route with this key is already registered.
    #[error("duplicate route {0:?}")]
    DuplicateRoute(String),

    /// Malformed envelope or body.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Broker collaborator failure.
    #[error("broker error: {0}")]
    Broker(String),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reply channel closed before the call resolved (client shut down).
    #[error("reply channel closed")]
    ChannelClosed,
}

impl Error {
    /// Re-hydrate a remote failure from its wire representation.
    pub fn remote(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Remote {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Stable tag carried on the wire as `error_kind`.
    pub fn kind(&self) -> &str {
        match self {
            Error::Timeout => "Timeout",
            Error::Remote { kind, .. } => kind,
            Error::SerializationMismatch(_) => "SerializationMismatch",
            Error::InvalidTarget(_) => "InvalidTarget",
            Error::DuplicateRoute(_) => "DuplicateRoute",
            Error::Protocol(_) => "Protocol",
            Error::Broker(_) => "Broker",
            Error::Serialization(_) => "Serialization",
            Error::ChannelClosed => "ChannelClosed",
        }
    }

    /// Human-readable message carried on the wire as `error_message`.
    pub fn message(&self) -> String {
        match self {
            Error::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for RPC operations.
pub type Result<T> = std::result::Result<T, Error>;
