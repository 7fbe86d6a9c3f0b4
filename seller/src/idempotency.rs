//! Request deduplication (C1): a bounded map from message ID to the first
//! response produced for it, so a retried request returns the original
//! result instead of re-running a side-effecting handler.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use marketplace_core::{Envelope, MessageId};
use tokio::sync::RwLock;

struct CachedResponse {
    response: Envelope,
    recorded_at: DateTime<Utc>,
}

/// Deduplicates incoming requests by message ID within a retention window.
///
/// Consulted strictly before any side-effecting handler runs: a hit bypasses
/// the handler entirely and returns the cached response verbatim, byte-for-byte
/// identical to the first.
pub struct IdempotencyCache {
    retention: Duration,
    entries: RwLock<HashMap<MessageId, CachedResponse>>,
}

impl IdempotencyCache {
    /// Build a cache retaining entries for `retention`.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a previously recorded response for `message_id`, if any and
    /// not yet expired.
    pub async fn seen(&self, message_id: &MessageId) -> Option<Envelope> {
        let guard = self.entries.read().await;
        guard.get(message_id).map(|cached| cached.response.clone())
    }

    /// Record `response` as the first result for `message_id`, so later
    /// retries of the same logical request return it unchanged.
    pub async fn record(&self, message_id: MessageId, response: Envelope, now: DateTime<Utc>) {
        let mut guard = self.entries.write().await;
        guard.insert(message_id, CachedResponse { response, recorded_at: now });
    }

    /// Remove every entry older than the retention window. Intended to run
    /// on a periodic sweep, mirroring the reservation expiry sweep.
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|_, cached| now - cached.recorded_at < self.retention);
        before - guard.len()
    }

    /// Number of entries currently cached, for introspection and tests.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache currently holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketplace_core::{MessageKind, Payload, SellerId};

    fn envelope(message_id: MessageId, at: DateTime<Utc>) -> Envelope {
        Envelope {
            message_id,
            correlation_id: marketplace_core::CorrelationId::new(),
            kind: MessageKind::Success,
            sender_id: SellerId::from("seller-a"),
            order_id: None,
            timestamp: at,
            payload: Payload::Ok,
        }
    }

    #[tokio::test]
    async fn a_recorded_response_is_returned_on_replay() {
        let cache = IdempotencyCache::new(Duration::minutes(30));
        let now = Utc::now();
        let message_id = MessageId::new();
        assert!(cache.seen(&message_id).await.is_none());

        cache.record(message_id.clone(), envelope(message_id.clone(), now), now).await;

        let cached = cache.seen(&message_id).await.expect("should be cached");
        assert_eq!(cached.message_id, message_id);
    }

    #[tokio::test]
    async fn eviction_drops_entries_past_the_retention_window() {
        let cache = IdempotencyCache::new(Duration::minutes(30));
        let recorded_at = Utc::now();
        let message_id = MessageId::new();
        cache.record(message_id.clone(), envelope(message_id.clone(), recorded_at), recorded_at).await;

        let still_within = recorded_at + Duration::minutes(29);
        assert_eq!(cache.evict_expired(still_within).await, 0);
        assert!(cache.seen(&message_id).await.is_some());

        let past_window = recorded_at + Duration::minutes(31);
        assert_eq!(cache.evict_expired(past_window).await, 1);
        assert!(cache.seen(&message_id).await.is_none());
    }
}
