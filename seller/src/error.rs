//! Seller-side failure reasons, surfaced to the coordinator as
//! `Payload::Error { reason }` and never as a transport fault — the seller
//! always answers, even when it's answering no.

use thiserror::Error;

/// Why a RESERVE, CONFIRM, or CANCEL request was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SellerError {
    /// `quantity` was zero (or, structurally, negative).
    #[error("quantity must be positive")]
    InvalidQuantity,
    /// Fewer than `quantity` units are available.
    #[error("insufficient stock")]
    OutOfStock,
    /// No reservation exists with the given ID.
    #[error("unknown reservation")]
    UnknownReservation,
    /// The reservation exists but has already been confirmed.
    #[error("reservation already confirmed")]
    AlreadyConfirmed,
    /// The reservation exists but its expiry has passed.
    #[error("reservation expired")]
    ReservationExpired,
}

impl SellerError {
    /// The reason string carried in the `Payload::Error` response.
    #[must_use]
    pub fn reason(&self) -> String {
        self.to_string()
    }
}
