//! Applies an incoming request envelope to inventory, behind the
//! idempotency cache.

use chrono::Utc;
use marketplace_core::{Envelope, MessageKind, Payload, SellerId};

use crate::error::SellerError;
use crate::idempotency::IdempotencyCache;
use crate::inventory::Inventory;

/// Handle one request envelope: consult the idempotency cache first, and on
/// a miss run the corresponding inventory operation, cache the result, and
/// return it.
///
/// Heartbeats are answered directly and never touch the cache or
/// inventory — they carry no message ID. `Success`/`Error`/`Confirm`'s
/// variants of the request side never reach this function; it only handles
/// the three inbound request kinds.
pub async fn dispatch(request: &Envelope, identity: &SellerId, inventory: &Inventory, idempotency: &IdempotencyCache) -> Envelope {
    if request.kind == MessageKind::Heartbeat {
        return request.respond(MessageKind::Heartbeat, identity.clone(), Payload::Heartbeat, Utc::now());
    }

    if let Some(cached) = idempotency.seen(&request.message_id).await {
        return cached;
    }

    let now = Utc::now();
    let result = match &request.payload {
        Payload::Reserve { product_id, quantity } => {
            inventory.reserve(product_id, *quantity, now).await.map(|reservation_id| Payload::ReservedOk { reservation_id })
        }
        Payload::Confirm { reservation_id } => inventory.confirm(*reservation_id, now).await.map(|()| Payload::Ok),
        Payload::Cancel { reservation_id } => inventory.cancel(*reservation_id).await.map(|()| Payload::Ok),
        _ => Err(SellerError::InvalidQuantity),
    };

    let response = match result {
        Ok(payload) => request.respond(MessageKind::Success, identity.clone(), payload, now),
        Err(error) => request.respond(MessageKind::Error, identity.clone(), Payload::Error { reason: error.reason() }, now),
    };

    idempotency.record(request.message_id.clone(), response.clone(), now).await;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use marketplace_core::ProductId;
    use std::collections::HashMap;

    fn identity() -> SellerId {
        SellerId::from("seller-a")
    }

    fn reserve_request(product_id: ProductId, quantity: u32) -> Envelope {
        Envelope::request(MessageKind::Reserve, identity(), None, Payload::Reserve { product_id, quantity }, Utc::now())
    }

    #[tokio::test]
    async fn a_replayed_message_id_returns_the_original_response_unchanged() {
        let inventory = Inventory::new(HashMap::from([(ProductId::from("widget"), 10)]), Duration::minutes(5));
        let idempotency = IdempotencyCache::new(Duration::minutes(30));
        let request = reserve_request(ProductId::from("widget"), 3);

        let first = dispatch(&request, &identity(), &inventory, &idempotency).await;
        let replay = dispatch(&request, &identity(), &inventory, &idempotency).await;

        assert_eq!(first, replay);
        // Only one unit of stock was actually taken, not two.
        assert_eq!(inventory.available(&ProductId::from("widget")).await, 7);
    }

    #[tokio::test]
    async fn out_of_stock_is_reported_as_an_error_payload_not_a_transport_failure() {
        let inventory = Inventory::new(HashMap::from([(ProductId::from("widget"), 1)]), Duration::minutes(5));
        let idempotency = IdempotencyCache::new(Duration::minutes(30));
        let request = reserve_request(ProductId::from("widget"), 5);

        let response = dispatch(&request, &identity(), &inventory, &idempotency).await;

        assert_eq!(response.kind, MessageKind::Error);
        assert!(matches!(response.payload, Payload::Error { .. }));
    }

    #[tokio::test]
    async fn heartbeats_bypass_the_idempotency_cache() {
        let inventory = Inventory::new(HashMap::new(), Duration::minutes(5));
        let idempotency = IdempotencyCache::new(Duration::minutes(30));
        let request = Envelope::request(MessageKind::Heartbeat, identity(), None, Payload::Heartbeat, Utc::now());

        let response = dispatch(&request, &identity(), &inventory, &idempotency).await;

        assert_eq!(response.kind, MessageKind::Heartbeat);
        assert!(idempotency.is_empty().await);
    }
}
