//! End-to-end tests driving a real [`SellerService`] over a loopback TCP
//! connection against a [`TransportBroker`] standing in for the
//! coordinator's transport layer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use marketplace_core::{Envelope, MessageKind, Payload, ProductId, SellerId};
use marketplace_seller::{SellerConfig, SellerService};
use marketplace_transport::{TransportBroker, TransportError};

async fn spawn_broker(addr: SocketAddr) -> Arc<TransportBroker> {
    let broker = Arc::new(TransportBroker::new(SellerId::from("coordinator")));
    let accept = Arc::clone(&broker);
    tokio::spawn(async move {
        let _ = accept.run(addr).await;
    });
    // Give the listener a moment to bind before the seller dials in.
    tokio::time::sleep(Duration::from_millis(50)).await;
    broker
}

fn config(port: u16, stock: HashMap<ProductId, u32>) -> SellerConfig {
    SellerConfig {
        seller_id: "seller-a".to_string(),
        coordinator_addr: format!("127.0.0.1:{port}").parse().unwrap(),
        reservation_timeout_ms: 5 * 60 * 1000,
        cleanup_interval_seconds: 60,
        idempotency_retention_time_ms: 30 * 60 * 1000,
        heartbeat_interval_seconds: 30,
        initial_stock: stock,
    }
}

/// The broker registers an accepted connection asynchronously, slightly
/// after [`SellerService::connect`] returns on the dialing side, so the
/// very first request in a test retries past that short window rather than
/// racing it.
async fn send_request_eventually(
    broker: &TransportBroker,
    seller_id: &SellerId,
    kind: MessageKind,
    payload: Payload,
) -> Envelope {
    for attempt in 0..20 {
        match broker.send_request(seller_id, kind, None, payload.clone(), Duration::from_millis(200)).await {
            Ok(response) => return response,
            Err(TransportError::PeerUnavailable { .. } | TransportError::Timeout { .. }) if attempt < 19 => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(error) => panic!("request to seller failed: {error}"),
        }
    }
    unreachable!("loop either returns or panics before exhausting its attempts");
}

#[tokio::test]
async fn reserve_then_confirm_round_trips_over_the_wire() {
    let addr: SocketAddr = "127.0.0.1:18601".parse().unwrap();
    let broker = spawn_broker(addr).await;
    let widget = ProductId::from("widget");
    let cfg = config(18601, HashMap::from([(widget.clone(), 10)]));

    let service = SellerService::connect(&cfg).await.unwrap();
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let seller_id = SellerId::from(cfg.seller_id.clone());
    tokio::spawn(service.run(cfg, shutdown_rx));

    let reserve_response =
        send_request_eventually(&broker, &seller_id, MessageKind::Reserve, Payload::Reserve { product_id: widget, quantity: 4 }).await;
    let Payload::ReservedOk { reservation_id } = reserve_response.payload else {
        unreachable!("reserve against fresh stock must succeed");
    };

    let confirm_response = broker
        .send_request(&seller_id, MessageKind::Confirm, None, Payload::Confirm { reservation_id }, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(confirm_response.kind, MessageKind::Success);
}

#[tokio::test]
async fn a_retried_reserve_with_the_same_message_id_does_not_double_reserve() {
    let addr: SocketAddr = "127.0.0.1:18602".parse().unwrap();
    let broker = spawn_broker(addr).await;
    let widget = ProductId::from("widget");
    let cfg = config(18602, HashMap::from([(widget.clone(), 10)]));

    let service = SellerService::connect(&cfg).await.unwrap();
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let seller_id = SellerId::from(cfg.seller_id.clone());
    tokio::spawn(service.run(cfg, shutdown_rx));

    let first =
        send_request_eventually(&broker, &seller_id, MessageKind::Reserve, Payload::Reserve { product_id: widget.clone(), quantity: 4 })
            .await;

    let envelope = Envelope {
        message_id: first.message_id.clone(),
        correlation_id: first.correlation_id.clone(),
        ..Envelope::request(MessageKind::Reserve, SellerId::from("coordinator"), None, Payload::Reserve { product_id: widget, quantity: 4 }, chrono::Utc::now())
    };
    let replay = broker.send_with_envelope(&seller_id, envelope, Duration::from_secs(2)).await.unwrap();

    assert_eq!(first.payload, replay.payload);
}

#[tokio::test]
async fn cancel_of_an_already_confirmed_reservation_is_rejected() {
    let addr: SocketAddr = "127.0.0.1:18603".parse().unwrap();
    let broker = spawn_broker(addr).await;
    let widget = ProductId::from("widget");
    let cfg = config(18603, HashMap::from([(widget.clone(), 10)]));

    let service = SellerService::connect(&cfg).await.unwrap();
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let seller_id = SellerId::from(cfg.seller_id.clone());
    tokio::spawn(service.run(cfg, shutdown_rx));

    let reserve_response =
        send_request_eventually(&broker, &seller_id, MessageKind::Reserve, Payload::Reserve { product_id: widget, quantity: 2 }).await;
    let Payload::ReservedOk { reservation_id } = reserve_response.payload else {
        unreachable!("reserve against fresh stock must succeed");
    };
    broker
        .send_request(&seller_id, MessageKind::Confirm, None, Payload::Confirm { reservation_id }, Duration::from_secs(2))
        .await
        .unwrap();

    let cancel_response = broker
        .send_request(&seller_id, MessageKind::Cancel, None, Payload::Cancel { reservation_id }, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(cancel_response.kind, MessageKind::Error);
}
