//! Object-safe seam over "send a request, await a response" so the saga
//! orchestrator can be driven by either the real broker or an in-memory
//! fake in tests.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use marketplace_core::{Envelope, MessageKind, OrderId, Payload, SellerId};

use crate::broker::TransportBroker;
use crate::error::TransportError;

/// Sends a request to a named peer and awaits its response. Implemented by
/// [`TransportBroker`] for production use and by an in-memory fake for
/// tests.
pub trait RequestSender: Send + Sync {
    /// Send `payload` as a `kind` request to `peer`, waiting up to
    /// `timeout` for a response. Mints a fresh message ID, so this is only
    /// correct for a one-shot call; a caller that may retry the same
    /// logical request must use [`Self::send_with_envelope`] instead so
    /// every attempt carries the same message ID.
    fn send_request(
        &self,
        peer: &SellerId,
        kind: MessageKind,
        order_id: Option<OrderId>,
        payload: Payload,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Envelope, TransportError>> + Send + '_>>;

    /// Send a caller-built `envelope` to `peer`, waiting up to `timeout`
    /// for a response. The implementation mints a fresh correlation ID per
    /// call but leaves the envelope's message ID untouched, so a caller
    /// that retries the same envelope across attempts gets stable
    /// idempotency-key behavior at the seller.
    fn send_with_envelope(
        &self,
        peer: &SellerId,
        envelope: Envelope,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Envelope, TransportError>> + Send + '_>>;
}

impl RequestSender for TransportBroker {
    fn send_request(
        &self,
        peer: &SellerId,
        kind: MessageKind,
        order_id: Option<OrderId>,
        payload: Payload,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Envelope, TransportError>> + Send + '_>> {
        Box::pin(TransportBroker::send_request(self, peer, kind, order_id, payload, timeout))
    }

    fn send_with_envelope(
        &self,
        peer: &SellerId,
        envelope: Envelope,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Envelope, TransportError>> + Send + '_>> {
        Box::pin(TransportBroker::send_with_envelope(self, peer, envelope, timeout))
    }
}
