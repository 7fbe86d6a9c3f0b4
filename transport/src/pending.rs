//! Correlation-ID keyed table of in-flight requests awaiting a response.

use std::collections::HashMap;
use std::sync::Mutex;

use marketplace_core::{CorrelationId, Envelope};
use tokio::sync::oneshot;

/// Tracks requests awaiting a response, keyed by correlation ID.
///
/// Insertion happens on send; removal happens on whichever of "response
/// arrived" or "timeout elapsed" observes the entry first. Heartbeats never
/// pass through this table.
#[derive(Default)]
pub struct PendingTable {
    inner: Mutex<HashMap<CorrelationId, oneshot::Sender<Envelope>>>,
}

impl PendingTable {
    /// Construct an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending request, returning the receiving half of its
    /// completion channel.
    pub fn insert(&self, correlation_id: CorrelationId) -> oneshot::Receiver<Envelope> {
        let (tx, rx) = oneshot::channel();
        #[allow(clippy::unwrap_used)]
        let mut guard = self.inner.lock().unwrap();
        guard.insert(correlation_id, tx);
        rx
    }

    /// Complete the pending request for `correlation_id`, if still present.
    /// Returns `false` if nothing was waiting (already timed out or
    /// unknown correlation ID), matching "late responses after timeout are
    /// dropped".
    pub fn complete(&self, correlation_id: &CorrelationId, response: Envelope) -> bool {
        #[allow(clippy::unwrap_used)]
        let mut guard = self.inner.lock().unwrap();
        if let Some(tx) = guard.remove(correlation_id) {
            tx.send(response).is_ok()
        } else {
            false
        }
    }

    /// Remove a pending entry without completing it (used on timeout).
    pub fn remove(&self, correlation_id: &CorrelationId) {
        #[allow(clippy::unwrap_used)]
        let mut guard = self.inner.lock().unwrap();
        guard.remove(correlation_id);
    }

    /// The number of currently outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        #[allow(clippy::unwrap_used)]
        let guard = self.inner.lock().unwrap();
        guard.len()
    }

    /// Whether there are no outstanding requests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain every pending entry, dropping their sender halves so awaiting
    /// callers observe a closed channel. Used during shutdown.
    pub fn clear(&self) {
        #[allow(clippy::unwrap_used)]
        let mut guard = self.inner.lock().unwrap();
        guard.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marketplace_core::{MessageKind, Payload, SellerId};

    fn sample_envelope(correlation_id: CorrelationId) -> Envelope {
        Envelope {
            message_id: marketplace_core::MessageId::new(),
            correlation_id,
            kind: MessageKind::Success,
            sender_id: SellerId::from("seller-1"),
            order_id: None,
            timestamp: Utc::now(),
            payload: Payload::Ok,
        }
    }

    #[tokio::test]
    async fn completes_pending_entry() {
        let table = PendingTable::new();
        let correlation_id = CorrelationId::new();
        let rx = table.insert(correlation_id.clone());
        assert!(table.complete(&correlation_id, sample_envelope(correlation_id.clone())));
        let received = rx.await.unwrap();
        assert_eq!(received.correlation_id, correlation_id);
    }

    #[tokio::test]
    async fn completing_unknown_id_is_noop() {
        let table = PendingTable::new();
        let correlation_id = CorrelationId::new();
        assert!(!table.complete(&correlation_id, sample_envelope(correlation_id)));
    }

    #[tokio::test]
    async fn remove_drops_without_completing() {
        let table = PendingTable::new();
        let correlation_id = CorrelationId::new();
        let rx = table.insert(correlation_id.clone());
        table.remove(&correlation_id);
        assert!(rx.await.is_err());
    }
}
