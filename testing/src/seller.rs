//! An in-process seller plus a [`RequestSender`] that routes to a
//! registry of such sellers, fast enough to drive saga integration tests
//! without real sockets and with hooks for injecting transient failures.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use marketplace_core::{
    Envelope, MessageId, MessageKind, OrderId, Payload, ProductId, Reservation, ReservationId, SellerId,
};
use marketplace_transport::{RequestSender, TransportError};

struct SellerState {
    stock: HashMap<ProductId, u32>,
    reservations: HashMap<ReservationId, Reservation>,
    message_log: HashMap<MessageId, Envelope>,
}

/// An in-memory stand-in for a seller participant, implementing the
/// reserve/confirm/cancel contract directly in-process.
pub struct InMemorySeller {
    id: SellerId,
    state: Mutex<SellerState>,
    reservation_ttl: chrono::Duration,
}

impl InMemorySeller {
    /// Create a seller stocked per `initial_stock`.
    #[must_use]
    pub fn new(id: SellerId, initial_stock: HashMap<ProductId, u32>) -> Self {
        Self {
            id,
            state: Mutex::new(SellerState {
                stock: initial_stock,
                reservations: HashMap::new(),
                message_log: HashMap::new(),
            }),
            reservation_ttl: chrono::Duration::minutes(5),
        }
    }

    /// Override the default 5-minute reservation expiry, e.g. to force an
    /// expiry-driven confirm failure in a test.
    pub fn set_reservation_ttl(&mut self, ttl: chrono::Duration) {
        self.reservation_ttl = ttl;
    }

    /// Current available stock for a product, for test assertions.
    #[must_use]
    pub fn available_stock(&self, product_id: &ProductId) -> u32 {
        #[allow(clippy::unwrap_used)]
        let guard = self.state.lock().unwrap();
        guard.stock.get(product_id).copied().unwrap_or(0)
    }

    /// Number of reservations currently held (confirmed or not), for test
    /// assertions.
    #[must_use]
    pub fn reservation_count(&self) -> usize {
        #[allow(clippy::unwrap_used)]
        let guard = self.state.lock().unwrap();
        guard.reservations.len()
    }

    /// Sweep expired, unconfirmed reservations back into available stock.
    pub fn sweep_expired(&self) {
        let now = Utc::now();
        #[allow(clippy::unwrap_used)]
        let mut guard = self.state.lock().unwrap();
        let expired: Vec<ReservationId> = guard
            .reservations
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.reservation_id)
            .collect();
        for reservation_id in expired {
            if let Some(r) = guard.reservations.remove(&reservation_id) {
                *guard.stock.entry(r.product_id.clone()).or_insert(0) += r.quantity;
            }
        }
    }

    /// Apply a request envelope and produce its response, implementing the
    /// reserve/confirm/cancel contract.
    ///
    /// Consults the message log first: a replayed message ID returns the
    /// original response without re-running the side-effecting branch
    /// below, the same idempotency contract `seller::handler::dispatch`
    /// enforces against the real `IdempotencyCache`.
    pub fn handle(&self, request: &Envelope) -> Envelope {
        let now = Utc::now();
        #[allow(clippy::unwrap_used)]
        let mut guard = self.state.lock().unwrap();
        if let Some(cached) = guard.message_log.get(&request.message_id) {
            return cached.clone();
        }
        let response = match &request.payload {
            Payload::Reserve { product_id: _, quantity } if *quantity == 0 => request.respond(
                MessageKind::Error,
                self.id.clone(),
                Payload::Error {
                    reason: "quantity must be positive".into(),
                },
                now,
            ),
            Payload::Reserve { product_id, quantity } if guard.stock.get(product_id).copied().unwrap_or(0) < *quantity => request.respond(
                MessageKind::Error,
                self.id.clone(),
                Payload::Error {
                    reason: "insufficient stock".into(),
                },
                now,
            ),
            Payload::Reserve { product_id, quantity } => {
                let available = guard.stock.get(product_id).copied().unwrap_or(0);
                guard.stock.insert(product_id.clone(), available - quantity);
                let reservation_id = ReservationId::new();
                guard.reservations.insert(
                    reservation_id,
                    Reservation {
                        reservation_id,
                        product_id: product_id.clone(),
                        quantity: *quantity,
                        confirmed: false,
                        expires_at: now + self.reservation_ttl,
                    },
                );
                request.respond(
                    MessageKind::Success,
                    self.id.clone(),
                    Payload::ReservedOk { reservation_id },
                    now,
                )
            }
            Payload::Confirm { reservation_id } => {
                match guard.reservations.get_mut(reservation_id) {
                    Some(reservation) if reservation.is_expired(now) => request.respond(
                        MessageKind::Error,
                        self.id.clone(),
                        Payload::Error {
                            reason: "reservation expired".into(),
                        },
                        now,
                    ),
                    Some(reservation) if reservation.confirmed => request.respond(
                        MessageKind::Error,
                        self.id.clone(),
                        Payload::Error {
                            reason: "reservation already confirmed".into(),
                        },
                        now,
                    ),
                    Some(reservation) => {
                        reservation.confirmed = true;
                        request.respond(MessageKind::Success, self.id.clone(), Payload::Ok, now)
                    }
                    None => request.respond(
                        MessageKind::Error,
                        self.id.clone(),
                        Payload::Error {
                            reason: "unknown reservation".into(),
                        },
                        now,
                    ),
                }
            }
            Payload::Cancel { reservation_id } => match guard.reservations.get(reservation_id) {
                Some(reservation) if reservation.confirmed => request.respond(
                    MessageKind::Error,
                    self.id.clone(),
                    Payload::Error {
                        reason: "reservation already confirmed".into(),
                    },
                    now,
                ),
                Some(reservation) => {
                    let quantity = reservation.quantity;
                    let product_id = reservation.product_id.clone();
                    guard.reservations.remove(reservation_id);
                    *guard.stock.entry(product_id).or_insert(0) += quantity;
                    request.respond(MessageKind::Success, self.id.clone(), Payload::Ok, now)
                }
                None => request.respond(MessageKind::Success, self.id.clone(), Payload::Ok, now),
            },
            _ => request.respond(
                MessageKind::Error,
                self.id.clone(),
                Payload::Error {
                    reason: "unsupported request".into(),
                },
                now,
            ),
        };
        guard.message_log.insert(request.message_id, response.clone());
        response
    }
}

#[derive(Default)]
struct FailureInjection {
    drop_next: Mutex<HashMap<SellerId, u32>>,
    fail_next: Mutex<HashMap<SellerId, u32>>,
    delay: Mutex<HashMap<SellerId, Duration>>,
}

/// Routes [`RequestSender::send_request`] calls to a registry of
/// [`InMemorySeller`]s, with knobs to simulate dropped responses,
/// consecutive failures (for circuit breaker tests), and added latency
/// (for expiry-driven confirm failures).
#[derive(Default)]
pub struct InMemorySenderRegistry {
    sellers: HashMap<SellerId, InMemorySeller>,
    injection: FailureInjection,
    calls: AtomicU32,
}

impl InMemorySenderRegistry {
    /// An empty registry; register sellers with [`Self::register`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a seller to the registry.
    #[must_use]
    pub fn register(mut self, seller: InMemorySeller) -> Self {
        self.sellers.insert(seller.id.clone(), seller);
        self
    }

    /// Borrow a registered seller for test assertions.
    #[must_use]
    pub fn seller(&self, id: &SellerId) -> Option<&InMemorySeller> {
        self.sellers.get(id)
    }

    /// Drop the next `n` responses from `peer` as if the network ate them,
    /// forcing the caller to time out and retry.
    pub fn drop_next_responses(&self, peer: SellerId, n: u32) {
        #[allow(clippy::unwrap_used)]
        self.injection.drop_next.lock().unwrap().insert(peer, n);
    }

    /// Make the next `n` requests to `peer` fail outright (simulating a
    /// dead channel), useful for tripping a circuit breaker.
    pub fn fail_next_requests(&self, peer: SellerId, n: u32) {
        #[allow(clippy::unwrap_used)]
        self.injection.fail_next.lock().unwrap().insert(peer, n);
    }

    /// Add a fixed delay before responding to any request sent to `peer`.
    pub fn delay_responses(&self, peer: SellerId, delay: Duration) {
        #[allow(clippy::unwrap_used)]
        self.injection.delay.lock().unwrap().insert(peer, delay);
    }

    /// Total requests observed, across all peers.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn take_fail(&self, peer: &SellerId) -> bool {
        #[allow(clippy::unwrap_used)]
        let mut guard = self.injection.fail_next.lock().unwrap();
        match guard.get_mut(peer) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn take_drop(&self, peer: &SellerId) -> bool {
        #[allow(clippy::unwrap_used)]
        let mut guard = self.injection.drop_next.lock().unwrap();
        match guard.get_mut(peer) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn delay_for(&self, peer: &SellerId) -> Option<Duration> {
        #[allow(clippy::unwrap_used)]
        self.injection.delay.lock().unwrap().get(peer).copied()
    }
}

impl RequestSender for InMemorySenderRegistry {
    fn send_request(
        &self,
        peer: &SellerId,
        kind: MessageKind,
        order_id: Option<OrderId>,
        payload: Payload,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Envelope, TransportError>> + Send + '_>> {
        let envelope = Envelope::request(kind, peer.clone(), order_id, payload, Utc::now());
        self.send_with_envelope(peer, envelope, timeout)
    }

    fn send_with_envelope(
        &self,
        peer: &SellerId,
        envelope: Envelope,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Envelope, TransportError>> + Send + '_>> {
        let peer = peer.clone();
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if self.take_fail(&peer) {
                return Err(TransportError::Send {
                    peer: peer.to_string(),
                    reason: "injected failure".into(),
                });
            }

            if let Some(delay) = self.delay_for(&peer) {
                tokio::time::sleep(delay).await;
            }

            let Some(seller) = self.sellers.get(&peer) else {
                return Err(TransportError::PeerUnavailable {
                    peer: peer.to_string(),
                });
            };

            // Apply the request before checking for a dropped response: a
            // lost reply still means the seller already committed the
            // effect, which is exactly the case message-ID stability exists
            // to handle on the next retry.
            let response = seller.handle(&envelope);

            if self.take_drop(&peer) {
                tokio::time::sleep(timeout + Duration::from_millis(1)).await;
                return Err(TransportError::Timeout {
                    peer: peer.to_string(),
                });
            }

            Ok(response)
        })
    }
}
