// src/server/mod.rs

//! RPC server (dispatcher) implementation.
//!
//! Exposes named async handlers as broker-addressable routes. Each inbound
//! request runs as an independently cancellable task; every addressable
//! request produces at most one reply. A well-known cancellation route is
//! consumed for advisory cancellation of still-running invocations.

mod handler;

pub use handler::{route_handler, HandlerFuture, RouteHandler};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::domain::{BrokerPtr, ConsumerHandle, Envelope, QueueOptions, RoutingKey};
use crate::error::{Error, Result};
use crate::macros::{log_debug, log_error, log_info, log_warn};
use crate::protocol::{CallBody, CorrelationId, ReplyBody};
use crate::rpc_config::RpcConfig;
use crate::serializer::{Serializer, SerializerRegistry};

/// Acquire a state-map guard, ignoring poisoning.
///
/// Both maps hold independent per-key entries with no cross-field
/// invariants; the worst outcome of a poisoned lock is one lost
/// cancellation signal or route entry.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct RouteEntry {
    queue: String,
    consumer_tag: String,

    /// Route receive loop handle; kept so the task isn't dropped early.
    _rx_task: JoinHandle<()>,
}

/// Map of registered routes. `None` marks a reservation while the route's
/// queue declaration is still in flight, so concurrent `add_route` calls
/// for the same key are rejected as duplicates.
type RouteMap = HashMap<String, Option<RouteEntry>>;

/// Map of running invocations. The sender is the cooperative cancel
/// signal; the task races it against the handler and removes its own
/// entry on every exit path.
type RunningMap = HashMap<CorrelationId, oneshot::Sender<()>>;

/// Running RPC server instance.
///
/// Cheap to clone (internally `Arc`-backed).
#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    broker: BrokerPtr,
    config: RpcConfig,
    routes: Mutex<RouteMap>,
    running: Mutex<RunningMap>,
    serializers: SerializerRegistry,
    cancel_queue: String,
    cancel_consumer_tag: String,

    /// Cancellation receive loop handle.
    _cancel_rx_task: JoinHandle<()>,
}

impl RpcServer {
    // ---

    /// Create a server on an already-connected broker.
    ///
    /// Declares and binds the well-known cancellation queue (durable,
    /// shared between server instances) and starts consuming it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Broker` if the cancellation queue cannot be
    /// declared, bound, or consumed.
    pub async fn new(broker: BrokerPtr, config: RpcConfig) -> Result<Self> {
        // ---
        let cancel_queue = config.cancel_routing_key.clone();

        broker
            .declare_queue(&cancel_queue, &QueueOptions::durable_shared())
            .await?;
        broker
            .bind(&cancel_queue, &RoutingKey::from(cancel_queue.as_str()))
            .await?;

        let handle = broker.consume(&cancel_queue).await?;
        let cancel_consumer_tag = handle.tag;
        let mut inbox = handle.inbox;

        let inner = Arc::new_cyclic(|weak| {
            // ---
            let weak = weak.clone();

            let cancel_rx_task = tokio::spawn(async move {
                // ---
                while let Some(env) = inbox.recv().await {
                    match weak.upgrade() {
                        Some(inner) => RpcServer { inner }.on_cancel(env),
                        None => break,
                    }
                }
                log_debug!("cancellation consumer loop exited");
            });

            Inner {
                // ---
                broker,
                config,
                routes: Mutex::new(RouteMap::new()),
                running: Mutex::new(RunningMap::new()),
                serializers: SerializerRegistry::with_builtins(),
                cancel_queue,
                cancel_consumer_tag,
                _cancel_rx_task: cancel_rx_task,
            }
        });

        Ok(Self { inner })
    }

    /// Register an outgoing result codec, consulted in registration order
    /// against the *request's* content-type tag when encoding replies.
    /// Built-ins are pre-registered.
    pub fn add_serializer(&self, serializer: Arc<dyn Serializer>) {
        // ---
        self.inner.serializers.add(serializer);
    }

    /// Expose `handler` under `routing_key`.
    ///
    /// Declares an auto-deleting queue for the route (named from the
    /// configured prefix unless `queue_options` supplies a name), binds it
    /// and starts consuming. Requests to the route run concurrently, one
    /// spawned task each.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidTarget` - empty routing key
    /// - `Error::DuplicateRoute` - the key is already registered
    /// - `Error::Broker` - queue declaration, binding, or consumption failed
    pub async fn add_route(
        &self,
        routing_key: &str,
        handler: RouteHandler,
        queue_options: QueueOptions,
    ) -> Result<()> {
        // ---
        if routing_key.trim().is_empty() {
            return Err(Error::InvalidTarget(routing_key.to_owned()));
        }

        // Reserve the key before any await so a concurrent add_route for
        // the same key fails fast.
        {
            let mut routes = lock_ignore_poison(&self.inner.routes);
            if routes.contains_key(routing_key) {
                return Err(Error::DuplicateRoute(routing_key.to_owned()));
            }
            routes.insert(routing_key.to_owned(), None);
        }

        match self.install_route(routing_key, handler, queue_options).await {
            Ok(entry) => {
                log_info!("route {routing_key} registered on queue {}", entry.queue);
                lock_ignore_poison(&self.inner.routes)
                    .insert(routing_key.to_owned(), Some(entry));
                Ok(())
            }
            Err(e) => {
                lock_ignore_poison(&self.inner.routes).remove(routing_key);
                Err(e)
            }
        }
    }

    async fn install_route(
        &self,
        routing_key: &str,
        handler: RouteHandler,
        queue_options: QueueOptions,
    ) -> Result<RouteEntry> {
        // ---
        let queue = queue_options.name.clone().unwrap_or_else(|| {
            format!("{}.{}", self.inner.config.route_queue_prefix, routing_key)
        });

        self.inner.broker.declare_queue(&queue, &queue_options).await?;
        self.inner
            .broker
            .bind(&queue, &RoutingKey::from(routing_key))
            .await?;

        let ConsumerHandle { tag, mut inbox } = self.inner.broker.consume(&queue).await?;

        let weak = Arc::downgrade(&self.inner);
        let rx_task = tokio::spawn(async move {
            // ---
            while let Some(env) = inbox.recv().await {
                match weak.upgrade() {
                    Some(inner) => RpcServer { inner }.on_request(handler.clone(), env),
                    None => break,
                }
            }
            log_debug!("route consumer loop exited");
        });

        Ok(RouteEntry {
            queue,
            consumer_tag: tag,
            _rx_task: rx_task,
        })
    }

    /// Close the server: cancel all route consumers and delete their
    /// queues, tear down the cancellation consumer and queue, and fire
    /// cancel signals to any still-running tasks without waiting for them.
    ///
    /// Broker failures during teardown are logged, not raised.
    pub async fn close(&self) -> Result<()> {
        // ---
        let entries: Vec<RouteEntry> = {
            let mut routes = lock_ignore_poison(&self.inner.routes);
            routes.drain().filter_map(|(_, entry)| entry).collect()
        };

        for entry in entries {
            if let Err(_e) = self.inner.broker.cancel_consumer(&entry.consumer_tag).await {
                log_warn!("failed to cancel route consumer: {_e}");
            }
            if let Err(_e) = self.inner.broker.delete_queue(&entry.queue).await {
                log_warn!("failed to delete route queue {}: {_e}", entry.queue);
            }
        }

        if let Err(_e) = self
            .inner
            .broker
            .cancel_consumer(&self.inner.cancel_consumer_tag)
            .await
        {
            log_warn!("failed to cancel cancellation consumer: {_e}");
        }
        if let Err(_e) = self.inner.broker.delete_queue(&self.inner.cancel_queue).await {
            log_warn!("failed to delete cancellation queue: {_e}");
        }

        // Best-effort: signal the tasks, don't await their completion.
        let running: Vec<(CorrelationId, oneshot::Sender<()>)> = {
            let mut map = lock_ignore_poison(&self.inner.running);
            map.drain().collect()
        };
        for (_id, cancel_tx) in running {
            let _ = cancel_tx.send(());
        }

        Ok(())
    }

    /// Request receive path. Never raises: requests that can't be matched
    /// or parsed are logged and dropped, or answered with a structured
    /// protocol failure when a reply address is known.
    fn on_request(&self, handler: RouteHandler, env: Envelope) {
        // ---
        let Some(reply_to) = env.reply_to else {
            log_warn!("request on {} without reply_to dropped", env.routing_key);
            return;
        };

        let Some(correlation_id) = env.correlation_id else {
            log_warn!("request on {} without correlation id dropped", env.routing_key);
            return;
        };

        let content_type = env.content_type.clone();

        let body = match CallBody::decode(&env.body) {
            Ok(body) => body,
            Err(e) => {
                // The reply address is known, so answer malformed input
                // with a structured failure instead of starving the caller
                // into a timeout.
                log_warn!("malformed request body for {correlation_id}: {e}");
                let failure = Error::Protocol(format!("malformed call body: {e}"));
                self.spawn_reply(reply_to, correlation_id, content_type, ReplyBody::failure(&failure));
                return;
            }
        };

        // Register the cancel signal before the task exists so an early
        // cancellation can never miss the entry.
        let (cancel_tx, cancel_rx) = oneshot::channel();
        lock_ignore_poison(&self.inner.running).insert(correlation_id.clone(), cancel_tx);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            // ---
            let invocation = handler(body);

            tokio::select! {
                _ = cancel_rx => {
                    // Cancelled before completion: no reply is sent.
                    log_debug!("invocation {correlation_id} cancelled");
                }
                outcome = invocation => {
                    let reply = build_reply(&inner.serializers, content_type.as_deref(), outcome);

                    match reply.encode() {
                        Ok(bytes) => {
                            let env = Envelope::reply(
                                reply_to,
                                bytes,
                                correlation_id.clone(),
                                content_type,
                            );
                            if let Err(e) = inner.broker.publish(env).await {
                                // Fire-and-forget beyond the broker's own
                                // delivery semantics: no retry.
                                log_error!("reply publish for {correlation_id} failed: {e}");
                            }
                        }
                        Err(_e) => log_warn!("reply encode for {correlation_id} failed: {_e}"),
                    }
                }
            }

            lock_ignore_poison(&inner.running).remove(&correlation_id);
        });
    }

    /// Cancellation receive path. Advisory: effective only at the
    /// handler's next suspension point, and may lose the race with the
    /// handler's own completion.
    fn on_cancel(&self, env: Envelope) {
        // ---
        let Some(correlation_id) = env.correlation_id else {
            log_warn!("cancellation without correlation id dropped");
            return;
        };

        match lock_ignore_poison(&self.inner.running).remove(&correlation_id) {
            Some(cancel_tx) => {
                if cancel_tx.send(()).is_err() {
                    log_debug!("cancellation for {correlation_id} arrived too late");
                }
            }
            None => log_warn!("cancellation for unknown correlation id {correlation_id}"),
        }
    }

    /// Publish a reply from a synchronous receive path.
    fn spawn_reply(
        &self,
        reply_to: RoutingKey,
        correlation_id: CorrelationId,
        content_type: Option<Arc<str>>,
        reply: ReplyBody,
    ) {
        // ---
        let inner = self.inner.clone();

        tokio::spawn(async move {
            match reply.encode() {
                Ok(bytes) => {
                    let env = Envelope::reply(reply_to, bytes, correlation_id.clone(), content_type);
                    if let Err(e) = inner.broker.publish(env).await {
                        log_error!("reply publish for {correlation_id} failed: {e}");
                    }
                }
                Err(_e) => log_warn!("reply encode for {correlation_id} failed: {_e}"),
            }
        });
    }
}

/// Turn a handler outcome into the wire reply.
///
/// Success is serialized with the codec matching the request's content
/// type; a missing codec or a failing serialize is captured as a failure
/// reply, never a crash.
fn build_reply(
    serializers: &SerializerRegistry,
    content_type: Option<&str>,
    outcome: Result<serde_json::Value>,
) -> ReplyBody {
    // ---
    match outcome {
        Ok(value) => match serializers.resolve(content_type) {
            Some(codec) => match codec.serialize(&value) {
                Ok(bytes) => ReplyBody::success(bytes),
                Err(e) => ReplyBody::failure(&e),
            },
            None => ReplyBody::failure(&Error::SerializationMismatch(
                content_type.unwrap_or_default().to_owned(),
            )),
        },
        Err(e) => ReplyBody::failure(&e),
    }
}
