//! The request/response envelope carried over the transport, shared between
//! the coordinator and seller sides so both crates serialize/deserialize
//! the same shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CorrelationId, MessageId, OrderId, ProductId, ReservationId, SellerId};

/// The kind of a message carried in an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Request to hold stock.
    Reserve,
    /// Request to make a held reservation permanent.
    Confirm,
    /// Request to release a reservation.
    Cancel,
    /// Periodic liveness signal; never occupies the pending-request table.
    Heartbeat,
    /// Successful response to a Reserve/Confirm/Cancel request.
    Success,
    /// Failed response to a Reserve/Confirm/Cancel request.
    Error,
}

/// The request- or response-specific payload of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Payload {
    /// Hold `quantity` units of `product_id`.
    Reserve {
        /// Product to reserve against.
        product_id: ProductId,
        /// Quantity to hold.
        quantity: u32,
    },
    /// Make `reservation_id` permanent.
    Confirm {
        /// Reservation to confirm.
        reservation_id: ReservationId,
    },
    /// Release `reservation_id` back to available stock.
    Cancel {
        /// Reservation to cancel.
        reservation_id: ReservationId,
    },
    /// Carries no data; used for liveness.
    Heartbeat,
    /// A successful Reserve response, carrying the assigned reservation.
    ReservedOk {
        /// Reservation minted for this request.
        reservation_id: ReservationId,
    },
    /// A successful Confirm or Cancel response.
    Ok,
    /// A failure response with a human-readable reason.
    Error {
        /// Why the request failed.
        reason: String,
    },
}

/// A single framed message exchanged between the coordinator and a seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Idempotency key, stable across retries of the same logical request.
    pub message_id: MessageId,
    /// Routes a response back to the request that is awaiting it.
    pub correlation_id: CorrelationId,
    /// What this message is.
    pub kind: MessageKind,
    /// Identity of whoever sent this frame.
    pub sender_id: SellerId,
    /// The order this request is being issued on behalf of, when
    /// applicable.
    pub order_id: Option<OrderId>,
    /// When this frame was produced.
    pub timestamp: DateTime<Utc>,
    /// The type-specific body.
    pub payload: Payload,
}

impl Envelope {
    /// Build a request envelope, minting fresh message and correlation IDs.
    #[must_use]
    pub fn request(
        kind: MessageKind,
        sender_id: SellerId,
        order_id: Option<OrderId>,
        payload: Payload,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: MessageId::new(),
            correlation_id: CorrelationId::new(),
            kind,
            sender_id,
            order_id,
            timestamp: now,
            payload,
        }
    }

    /// Build a response envelope that reuses the request's correlation and
    /// message IDs so the caller's pending-table lookup and the seller's
    /// idempotency cache line up.
    #[must_use]
    pub fn respond(&self, kind: MessageKind, sender_id: SellerId, payload: Payload, now: DateTime<Utc>) -> Self {
        Self {
            message_id: self.message_id.clone(),
            correlation_id: self.correlation_id.clone(),
            kind,
            sender_id,
            order_id: self.order_id.clone(),
            timestamp: now,
            payload,
        }
    }
}
