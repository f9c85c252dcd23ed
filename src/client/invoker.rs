// src/client/invoker.rs

//! The invoker: makes a remote call look like a local one.
//!
//! # Architecture
//!
//! On construction the client declares a private, exclusive, auto-deleting
//! reply queue, binds it under its own name, and runs a background receive
//! loop that matches incoming replies to pending calls by correlation id.
//!
//! Each call mints a unique correlation id and registers a oneshot channel
//! in the pending map. The receive loop negotiates the reply's content
//! type against the serializer registry and resolves the channel with the
//! final outcome, so the awaiting caller never touches raw bytes.
//!
//! # Concurrency
//!
//! Unboundedly many calls may be in flight at once, each isolated by its
//! own correlation id; there is no head-of-line blocking between calls.
//! The pending map is behind a mutex that is never held across an await.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time;

use super::pending::PendingCalls;
use crate::domain::{BrokerPtr, Envelope, QueueOptions, RoutingKey};
use crate::error::{Error, Result};
use crate::macros::{log_debug, log_warn};
use crate::protocol::{CallBody, CorrelationId, ReplyBody};
use crate::rpc_config::RpcConfig;
use crate::serializer::{Serializer, SerializerRegistry};

/// Acquire the pending-map guard, ignoring poisoning.
///
/// The map holds independent per-call oneshot senders with no cross-field
/// invariants; the worst outcome of a poisoned lock is one dropped reply.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Deadline for this call. Falls back to the configured default;
    /// `None` in both places waits indefinitely.
    pub timeout: Option<Duration>,

    /// Content-type tag negotiating the result encoding. Falls back to
    /// the configured default.
    pub content_type: Option<String>,
}

impl CallOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_content_type(mut self, tag: impl Into<String>) -> Self {
        self.content_type = Some(tag.into());
        self
    }
}

/// Running RPC client instance.
///
/// Cheap to clone (internally `Arc`-backed).
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    broker: BrokerPtr,
    config: RpcConfig,
    reply_queue: String,
    consumer_tag: String,
    pending: Mutex<PendingCalls>,
    serializers: SerializerRegistry,

    /// Reply receive loop handle; kept so the task isn't dropped early.
    _rx_task: JoinHandle<()>,
}

impl RpcClient {
    // ---

    /// Create a client on an already-connected broker.
    ///
    /// Declares the private reply queue and starts consuming it. Broker
    /// failures propagate; nothing is retried here.
    ///
    /// # Errors
    ///
    /// Returns `Error::Broker` if the reply queue cannot be declared,
    /// bound, or consumed.
    pub async fn new(broker: BrokerPtr, config: RpcConfig) -> Result<Self> {
        // ---
        let reply_queue = format!("{}.{}", config.reply_queue_prefix, uuid::Uuid::new_v4());

        broker
            .declare_queue(&reply_queue, &QueueOptions::exclusive_reply())
            .await?;
        broker
            .bind(&reply_queue, &RoutingKey::from(reply_queue.as_str()))
            .await?;

        let handle = broker.consume(&reply_queue).await?;
        let consumer_tag = handle.tag;
        let mut inbox = handle.inbox;

        // The rx loop holds only a weak reference so that dropping the
        // last client clone shuts the loop down.
        let inner = Arc::new_cyclic(|weak| {
            // ---
            let weak = weak.clone();

            let rx_task = tokio::spawn(async move {
                // ---
                while let Some(env) = inbox.recv().await {
                    match weak.upgrade() {
                        Some(inner) => RpcClient { inner }.on_reply(env),
                        None => break,
                    }
                }
                log_debug!("reply consumer loop exited");
            });

            Inner {
                // ---
                broker,
                config,
                reply_queue,
                consumer_tag,
                pending: Mutex::new(PendingCalls::new()),
                serializers: SerializerRegistry::with_builtins(),
                _rx_task: rx_task,
            }
        });

        Ok(Self { inner })
    }

    /// Register a result codec, consulted in registration order against
    /// the *reply's* content-type tag. Built-ins are pre-registered.
    pub fn add_serializer(&self, serializer: Arc<dyn Serializer>) {
        // ---
        self.inner.serializers.add(serializer);
    }

    /// Call a named route and await its result.
    ///
    /// Publishes a call envelope to `target`, then awaits the reply up to
    /// the effective timeout. On timeout a zero-body cancellation envelope
    /// carrying the same correlation id is published to the well-known
    /// cancellation route before `Error::Timeout` is returned; the
    /// cancellation is advisory and best-effort.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidTarget` - `target` does not name a route
    /// - `Error::Timeout` - deadline expired (after the cancellation publish)
    /// - `Error::Remote` - the handler failed; re-hydrated kind and message
    /// - `Error::SerializationMismatch` - no codec matches the reply's tag
    /// - `Error::Broker` - the call publish failed
    pub async fn call(&self, target: &str, args: CallBody, opts: CallOptions) -> Result<Value> {
        // ---
        if target.trim().is_empty() {
            return Err(Error::InvalidTarget(target.to_owned()));
        }

        let body = args.encode()?;
        let correlation_id = CorrelationId::generate();

        let rx = lock_ignore_poison(&self.inner.pending).register(correlation_id.clone());

        let content_type: Arc<str> = opts
            .content_type
            .as_deref()
            .unwrap_or(&self.inner.config.default_content_type)
            .into();

        let env = Envelope::call(
            RoutingKey::from(target),
            body,
            correlation_id.clone(),
            RoutingKey::from(self.inner.reply_queue.as_str()),
            content_type,
        );

        if let Err(e) = self.inner.broker.publish(env).await {
            lock_ignore_poison(&self.inner.pending).abandon(&correlation_id);
            return Err(e);
        }

        let deadline = opts.timeout.or(self.inner.config.default_timeout);

        let outcome = match deadline {
            Some(deadline) => match time::timeout(deadline, rx).await {
                Ok(resolved) => resolved,
                Err(_) => return self.on_timeout(correlation_id).await,
            },
            None => rx.await,
        };

        // RecvError: the client was closed while the call was in flight.
        outcome.map_err(|_| Error::ChannelClosed)?
    }

    /// Number of calls currently awaiting replies.
    pub fn in_flight(&self) -> usize {
        // ---
        lock_ignore_poison(&self.inner.pending).len()
    }

    /// Cancel the reply consumer and delete the private queue.
    pub async fn close(&self) -> Result<()> {
        // ---
        self.inner
            .broker
            .cancel_consumer(&self.inner.consumer_tag)
            .await?;
        self.inner.broker.delete_queue(&self.inner.reply_queue).await?;
        Ok(())
    }

    /// Timeout path: the local deadline is authoritative regardless of
    /// what the dispatcher does with the advisory cancellation.
    async fn on_timeout(&self, correlation_id: CorrelationId) -> Result<Value> {
        // ---
        lock_ignore_poison(&self.inner.pending).abandon(&correlation_id);

        let cancel = Envelope::cancellation(
            RoutingKey::from(self.inner.config.cancel_routing_key.as_str()),
            correlation_id,
        );

        if let Err(_e) = self.inner.broker.publish(cancel).await {
            log_warn!("cancellation publish failed: {_e}");
        }

        Err(Error::Timeout)
    }

    /// Reply receive path. Never raises: replies that can't be matched or
    /// parsed are logged and dropped.
    fn on_reply(&self, env: Envelope) {
        // ---
        // Clone the id out so the envelope stays whole for unpacking.
        let Some(correlation_id) = env.correlation_id.clone() else {
            log_warn!("reply without correlation id dropped");
            return;
        };

        let Some(tx) = lock_ignore_poison(&self.inner.pending).take(&correlation_id) else {
            log_debug!("reply for unknown correlation id {correlation_id} dropped");
            return;
        };

        let outcome = self.unpack_reply(&env);

        if tx.send(outcome).is_err() {
            log_debug!("reply arrived after call {correlation_id} was abandoned");
        }
    }

    /// Unpack `{success, payload}` and negotiate the result codec.
    fn unpack_reply(&self, env: &Envelope) -> Result<Value> {
        // ---
        let reply = ReplyBody::decode(&env.body)
            .map_err(|e| Error::Protocol(format!("malformed reply body: {e}")))?;

        if reply.is_error {
            return Err(Error::remote(reply.error_kind, reply.error_message));
        }

        let tag = env.content_type.as_deref();

        match self.inner.serializers.resolve(tag) {
            Some(codec) => codec.deserialize(&reply.payload),
            None => Err(Error::SerializationMismatch(
                tag.unwrap_or_default().to_owned(),
            )),
        }
    }
}
