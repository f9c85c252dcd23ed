// src/domain/broker.rs

//! Broker collaborator interface and the message envelope.
//!
//! The broker is assumed already connected and healthy; connection and
//! channel lifecycle, reconnection, and authentication are handled outside
//! this crate. The protocol layer only needs the small capability set
//! defined by [`Broker`]: queue declaration, binding, consumption, and
//! publishing.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::CorrelationId;

/// A broker routing key.
///
/// For calls this names the target function; for cancellation messages it
/// is a fixed well-known name; reply envelopes use the caller's private
/// reply queue name. The protocol layer treats it as an opaque identifier:
/// no hierarchy or wildcard semantics are assumed.
///
/// Cheap to clone and safe to share across threads.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RoutingKey(pub Arc<str>);

impl RoutingKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T> From<T> for RoutingKey
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        RoutingKey(value.into())
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Delivery mode requested for a published envelope.
///
/// Calls use [`DeliveryMode::Transient`] by convention: losing an
/// unanswered call on broker restart is acceptable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    #[default]
    Transient,
    Persistent,
}

/// Options for queue declaration.
#[derive(Clone, Debug, Default)]
pub struct QueueOptions {
    /// Explicit queue name. When `None`, callers derive one (e.g. from the
    /// routing key plus a configured prefix).
    pub name: Option<String>,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl QueueOptions {
    /// Options for a private per-client reply queue.
    pub fn exclusive_reply() -> Self {
        Self {
            name: None,
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }

    /// Options for a per-route request queue.
    pub fn route() -> Self {
        Self {
            name: None,
            durable: false,
            exclusive: false,
            auto_delete: true,
        }
    }

    /// Options for the shared durable cancellation queue.
    pub fn durable_shared() -> Self {
        Self {
            name: None,
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

/// The metadata+body unit exchanged over the broker.
///
/// Constructed per send; the broker delivers it without interpreting the
/// body or the correlation metadata.
#[derive(Clone, Debug)]
pub struct Envelope {
    /// Destination routing key.
    pub routing_key: RoutingKey,

    /// Correlation identifier. Required for all RPC processing; envelopes
    /// without one are dropped with a log by both sides.
    pub correlation_id: Option<CorrelationId>,

    /// Where the reply for this envelope should be published. Absent means
    /// fire-and-forget: the dispatcher parses the body best-effort and
    /// never replies.
    pub reply_to: Option<RoutingKey>,

    /// Negotiates which serializer decodes the *result* payload. Call
    /// bodies are always structured text regardless of this tag.
    pub content_type: Option<Arc<str>>,

    pub delivery_mode: DeliveryMode,

    /// Opaque body bytes.
    pub body: Bytes,
}

impl Envelope {
    /// Build a call envelope addressed to a named route.
    pub fn call(
        routing_key: RoutingKey,
        body: Bytes,
        correlation_id: CorrelationId,
        reply_to: RoutingKey,
        content_type: Arc<str>,
    ) -> Self {
        // ---
        Self {
            routing_key,
            correlation_id: Some(correlation_id),
            reply_to: Some(reply_to),
            content_type: Some(content_type),
            delivery_mode: DeliveryMode::Transient,
            body,
        }
    }

    /// Build a reply envelope addressed to a call's `reply_to` queue,
    /// carrying the correlation id and content-type metadata copied from
    /// the request.
    pub fn reply(
        reply_to: RoutingKey,
        body: Bytes,
        correlation_id: CorrelationId,
        content_type: Option<Arc<str>>,
    ) -> Self {
        // ---
        Self {
            routing_key: reply_to,
            correlation_id: Some(correlation_id),
            reply_to: None,
            content_type,
            delivery_mode: DeliveryMode::Transient,
            body,
        }
    }

    /// Build a zero-body cancellation envelope for the well-known
    /// cancellation route.
    pub fn cancellation(cancel_route: RoutingKey, correlation_id: CorrelationId) -> Self {
        // ---
        Self {
            routing_key: cancel_route,
            correlation_id: Some(correlation_id),
            reply_to: None,
            content_type: None,
            delivery_mode: DeliveryMode::Transient,
            body: Bytes::new(),
        }
    }
}

/// Handle returned from a successful `consume()`.
///
/// The consumer remains active until it is cancelled via
/// [`Broker::cancel_consumer`], its queue is deleted, or the handle's
/// inbox is dropped.
pub struct ConsumerHandle {
    /// Broker-minted tag identifying this consumer for cancellation.
    pub tag: String,

    /// Receiver channel for envelopes delivered to this consumer.
    pub inbox: mpsc::Receiver<Envelope>,
}

/// Broker abstraction.
///
/// Implementations must ensure that once `consume()` returns, envelopes
/// published afterwards to a routing key the queue is bound under are
/// deliverable to the returned inbox, and that `publish()` does not block
/// on slow consumers beyond transient backpressure. Unroutable envelopes
/// are dropped, not errors: the protocol above is at-most-once.
///
/// The in-memory broker serves as the reference implementation of these
/// semantics.
#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    /// Declare a queue. Re-declaring an existing queue with compatible
    /// options is a no-op; an exclusive queue may not be re-declared.
    async fn declare_queue(&self, name: &str, opts: &QueueOptions) -> Result<()>;

    /// Bind a queue under a routing key.
    async fn bind(&self, queue: &str, routing_key: &RoutingKey) -> Result<()>;

    /// Start consuming a queue. Each envelope goes to exactly one of the
    /// queue's consumers.
    async fn consume(&self, queue: &str) -> Result<ConsumerHandle>;

    /// Publish an envelope to its routing key.
    async fn publish(&self, env: Envelope) -> Result<()>;

    /// Cancel a consumer by tag, closing its inbox.
    async fn cancel_consumer(&self, tag: &str) -> Result<()>;

    /// Delete a queue, closing all of its consumers.
    async fn delete_queue(&self, queue: &str) -> Result<()>;
}

/// Shared broker pointer.
///
/// `.clone()` is cheap; clones share the underlying connection. Used to
/// erase concrete broker types behind a stable domain interface.
pub type BrokerPtr = Arc<dyn Broker>;
