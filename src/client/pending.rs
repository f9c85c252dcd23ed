use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::protocol::CorrelationId;

/// Tracks the single pending future per in-flight correlation id.
///
/// A call registers a oneshot sender here; the reply path takes the sender
/// out and resolves it with the fully-negotiated outcome. Removal on first
/// take is what makes resolution exactly-once.
pub(super) struct PendingCalls {
    calls: HashMap<CorrelationId, oneshot::Sender<Result<Value>>>,
}

impl PendingCalls {
    // ---

    pub fn new() -> Self {
        // ---
        Self {
            calls: HashMap::new(),
        }
    }

    /// Register a new pending call.
    ///
    /// Returns the receiver the caller awaits.
    pub fn register(&mut self, correlation_id: CorrelationId) -> oneshot::Receiver<Result<Value>> {
        // ---
        let (tx, rx) = oneshot::channel();
        self.calls.insert(correlation_id, tx);
        rx
    }

    /// Take the pending entry for a correlation id, if any.
    ///
    /// The entry is removed; a second take for the same id returns `None`.
    pub fn take(&mut self, correlation_id: &CorrelationId) -> Option<oneshot::Sender<Result<Value>>> {
        // ---
        self.calls.remove(correlation_id)
    }

    /// Drop a pending entry without resolving it (timeout cleanup).
    pub fn abandon(&mut self, correlation_id: &CorrelationId) -> bool {
        // ---
        self.calls.remove(correlation_id).is_some()
    }

    /// Number of in-flight calls.
    pub fn len(&self) -> usize {
        // ---
        self.calls.len()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn register_take_resolve() {
        // ---
        let mut pending = PendingCalls::new();
        let id = CorrelationId::generate();

        let rx = pending.register(id.clone());
        assert_eq!(pending.len(), 1);

        let tx = pending.take(&id).expect("entry should exist");
        assert_eq!(pending.len(), 0);

        tx.send(Ok(json!(42))).unwrap();
        assert_eq!(rx.blocking_recv().unwrap().unwrap(), json!(42));
    }

    #[test]
    fn take_is_exactly_once() {
        // ---
        let mut pending = PendingCalls::new();
        let id = CorrelationId::generate();

        let _rx = pending.register(id.clone());
        assert!(pending.take(&id).is_some());
        assert!(pending.take(&id).is_none());
    }

    #[test]
    fn abandon_removes_without_resolving() {
        // ---
        let mut pending = PendingCalls::new();
        let id = CorrelationId::generate();

        let mut rx = pending.register(id.clone());
        assert!(pending.abandon(&id));
        assert!(!pending.abandon(&id));

        // Sender dropped: the receiver observes closure, not a value.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn take_unknown_id_is_none() {
        // ---
        let mut pending = PendingCalls::new();
        assert!(pending.take(&CorrelationId::generate()).is_none());
    }
}
