// src/broker/memory.rs

//! In-memory broker implementation.
//!
//! Simulates a message broker entirely within the process: named queues,
//! routing-key bindings, and single-consumer delivery per envelope. It is
//! intended for testing and for validating protocol behavior without
//! network or broker variability.
//!
//! ## Semantics
//!
//! - Declares are idempotent, except that an exclusive queue may not be
//!   re-declared.
//! - A queue receives an envelope when one of its bindings equals the
//!   envelope's routing key exactly.
//! - Each envelope is delivered to exactly one consumer of each matching
//!   queue, rotating between consumers.
//! - Unroutable envelopes are dropped.
//! - An auto-delete queue is removed when its last consumer is cancelled.
//!
//! ## Non-Goals
//!
//! - Persistence (delivery mode is accepted and ignored)
//! - Network behavior or failure simulation
//! - Exact emulation of any specific broker product

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::domain::{Broker, BrokerPtr, ConsumerHandle, Envelope, QueueOptions, RoutingKey};
use crate::error::{Error, Result};
use crate::macros::log_debug;

const INBOX_CAPACITY: usize = 64;

struct MemoryConsumer {
    tag: String,
    tx: mpsc::Sender<Envelope>,
}

struct QueueState {
    exclusive: bool,
    auto_delete: bool,
    bindings: HashSet<RoutingKey>,
    consumers: Vec<MemoryConsumer>,
    /// Rotation cursor for consumer selection.
    next: usize,
}

struct MemoryBroker {
    queues: RwLock<HashMap<String, QueueState>>,
}

#[async_trait::async_trait]
impl Broker for MemoryBroker {
    // ---

    async fn declare_queue(&self, name: &str, opts: &QueueOptions) -> Result<()> {
        // ---
        let mut queues = self.queues.write().await;

        if let Some(existing) = queues.get(name) {
            if existing.exclusive || opts.exclusive {
                return Err(Error::Broker(format!(
                    "queue {name:?} is exclusive and cannot be re-declared"
                )));
            }
            // Compatible re-declare of a shared queue.
            return Ok(());
        }

        queues.insert(
            name.to_owned(),
            QueueState {
                exclusive: opts.exclusive,
                auto_delete: opts.auto_delete,
                bindings: HashSet::new(),
                consumers: Vec::new(),
                next: 0,
            },
        );

        Ok(())
    }

    async fn bind(&self, queue: &str, routing_key: &RoutingKey) -> Result<()> {
        // ---
        let mut queues = self.queues.write().await;

        let state = queues
            .get_mut(queue)
            .ok_or_else(|| Error::Broker(format!("bind to unknown queue {queue:?}")))?;

        state.bindings.insert(routing_key.clone());
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<ConsumerHandle> {
        // ---
        let mut queues = self.queues.write().await;

        let state = queues
            .get_mut(queue)
            .ok_or_else(|| Error::Broker(format!("consume on unknown queue {queue:?}")))?;

        let tag = format!("ctag-{}", Uuid::new_v4());
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);

        state.consumers.push(MemoryConsumer {
            tag: tag.clone(),
            tx,
        });

        Ok(ConsumerHandle { tag, inbox: rx })
    }

    /// Deliver an envelope to one consumer of each queue bound under its
    /// routing key. Matching is exact string equality; these are the
    /// reference semantics other brokers approximate.
    async fn publish(&self, env: Envelope) -> Result<()> {
        // ---
        let mut queues = self.queues.write().await;
        let mut routed = false;

        for state in queues.values_mut() {
            if !state.bindings.contains(&env.routing_key) || state.consumers.is_empty() {
                continue;
            }

            // Rotate through consumers, skipping any whose inbox was
            // dropped without an explicit cancel.
            let count = state.consumers.len();
            for offset in 0..count {
                let idx = (state.next + offset) % count;
                if state.consumers[idx].tx.send(env.clone()).await.is_ok() {
                    state.next = (idx + 1) % count;
                    routed = true;
                    break;
                }
            }
        }

        if !routed {
            log_debug!("unroutable envelope for {} dropped", env.routing_key);
        }

        Ok(())
    }

    async fn cancel_consumer(&self, tag: &str) -> Result<()> {
        // ---
        let mut queues = self.queues.write().await;
        let mut emptied: Vec<String> = Vec::new();

        for (name, state) in queues.iter_mut() {
            let before = state.consumers.len();
            state.consumers.retain(|c| c.tag != tag);

            if state.consumers.len() < before && state.consumers.is_empty() && state.auto_delete {
                emptied.push(name.clone());
            }
        }

        // Cancelling the last consumer of an auto-delete queue removes it.
        for name in emptied {
            queues.remove(&name);
        }

        Ok(())
    }

    async fn delete_queue(&self, queue: &str) -> Result<()> {
        // ---
        let mut queues = self.queues.write().await;
        queues.remove(queue);
        Ok(())
    }
}

/// Create a new in-memory broker.
///
/// Always available; requires no external resources.
pub async fn create_memory_broker() -> Result<BrokerPtr> {
    // ---
    let broker = MemoryBroker {
        queues: RwLock::new(HashMap::new()),
    };

    Ok(Arc::new(broker))
}
