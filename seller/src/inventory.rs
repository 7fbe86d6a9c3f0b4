//! Per-seller inventory and reservation state (C8): stock counters guarded
//! by a read-write lock, and the reservation table a confirm/cancel/expiry
//! sweep all mutate.
//!
//! Invariant maintained across every operation: `available_stock(p) + sum of
//! unconfirmed reservation quantities for p + sum of confirmed reservation
//! quantities for p == initial_stock(p)`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use marketplace_core::{ProductId, Reservation, ReservationId};
use tokio::sync::RwLock;

use crate::error::SellerError;

/// Inventory for one seller process: per-product stock plus the
/// reservation table backing it.
pub struct Inventory {
    stock: RwLock<HashMap<ProductId, u32>>,
    reservations: RwLock<HashMap<ReservationId, Reservation>>,
    reservation_ttl: Duration,
}

impl Inventory {
    /// Seed inventory with `initial_stock` and a reservation expiry of
    /// `reservation_ttl`.
    #[must_use]
    pub fn new(initial_stock: HashMap<ProductId, u32>, reservation_ttl: Duration) -> Self {
        Self {
            stock: RwLock::new(initial_stock),
            reservations: RwLock::new(HashMap::new()),
            reservation_ttl,
        }
    }

    /// Current available stock for a product (0 if never seeded).
    pub async fn available(&self, product_id: &ProductId) -> u32 {
        self.stock.read().await.get(product_id).copied().unwrap_or(0)
    }

    /// Number of reservations held, confirmed or not. For introspection and
    /// tests.
    pub async fn reservation_count(&self) -> usize {
        self.reservations.read().await.len()
    }

    /// Hold `quantity` units of `product_id`, minting a fresh reservation.
    ///
    /// # Errors
    ///
    /// Returns [`SellerError::InvalidQuantity`] if `quantity` is zero, or
    /// [`SellerError::OutOfStock`] if fewer than `quantity` units are
    /// available.
    pub async fn reserve(&self, product_id: &ProductId, quantity: u32, now: DateTime<Utc>) -> Result<ReservationId, SellerError> {
        if quantity == 0 {
            return Err(SellerError::InvalidQuantity);
        }
        let mut stock = self.stock.write().await;
        let available = stock.get(product_id).copied().unwrap_or(0);
        if available < quantity {
            return Err(SellerError::OutOfStock);
        }
        stock.insert(product_id.clone(), available - quantity);
        drop(stock);

        let reservation_id = ReservationId::new();
        let reservation = Reservation {
            reservation_id,
            product_id: product_id.clone(),
            quantity,
            confirmed: false,
            expires_at: now + self.reservation_ttl,
        };
        self.reservations.write().await.insert(reservation_id, reservation);
        Ok(reservation_id)
    }

    /// Make `reservation_id` permanent.
    ///
    /// # Errors
    ///
    /// Returns [`SellerError::UnknownReservation`],
    /// [`SellerError::ReservationExpired`], or
    /// [`SellerError::AlreadyConfirmed`] as appropriate.
    pub async fn confirm(&self, reservation_id: ReservationId, now: DateTime<Utc>) -> Result<(), SellerError> {
        let mut reservations = self.reservations.write().await;
        let reservation = reservations.get_mut(&reservation_id).ok_or(SellerError::UnknownReservation)?;
        if reservation.is_expired(now) {
            return Err(SellerError::ReservationExpired);
        }
        if reservation.confirmed {
            return Err(SellerError::AlreadyConfirmed);
        }
        reservation.confirmed = true;
        Ok(())
    }

    /// Release `reservation_id` back to available stock. Idempotent: an
    /// absent reservation (already cancelled, or swept as expired) reports
    /// success rather than an error.
    ///
    /// # Errors
    ///
    /// Returns [`SellerError::AlreadyConfirmed`] if the reservation has
    /// already been made permanent.
    pub async fn cancel(&self, reservation_id: ReservationId) -> Result<(), SellerError> {
        let mut reservations = self.reservations.write().await;
        let Some(reservation) = reservations.get(&reservation_id) else {
            return Ok(());
        };
        if reservation.confirmed {
            return Err(SellerError::AlreadyConfirmed);
        }
        let reservation = reservations.remove(&reservation_id).expect("checked Some above");
        drop(reservations);
        let mut stock = self.stock.write().await;
        *stock.entry(reservation.product_id).or_insert(0) += reservation.quantity;
        Ok(())
    }

    /// Restore stock for every unconfirmed reservation past its expiry.
    /// Returns the number of reservations swept, for logging and tests.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<ReservationId> = {
            let reservations = self.reservations.read().await;
            reservations
                .values()
                .filter(|r| r.is_expired(now))
                .map(|r| r.reservation_id)
                .collect()
        };
        let mut swept = 0;
        for reservation_id in expired {
            let mut reservations = self.reservations.write().await;
            if let Some(reservation) = reservations.remove(&reservation_id) {
                drop(reservations);
                let mut stock = self.stock.write().await;
                *stock.entry(reservation.product_id).or_insert(0) += reservation.quantity;
                swept += 1;
            }
        }
        swept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget() -> ProductId {
        ProductId::from("widget")
    }

    fn inventory(stock: u32) -> Inventory {
        Inventory::new(HashMap::from([(widget(), stock)]), Duration::minutes(5))
    }

    #[tokio::test]
    async fn reserve_decrements_available_stock() {
        let inv = inventory(10);
        let now = Utc::now();
        inv.reserve(&widget(), 4, now).await.unwrap();
        assert_eq!(inv.available(&widget()).await, 6);
        assert_eq!(inv.reservation_count().await, 1);
    }

    #[tokio::test]
    async fn reserve_rejects_zero_quantity() {
        let inv = inventory(10);
        assert_eq!(inv.reserve(&widget(), 0, Utc::now()).await, Err(SellerError::InvalidQuantity));
    }

    #[tokio::test]
    async fn reserve_rejects_insufficient_stock() {
        let inv = inventory(3);
        assert_eq!(inv.reserve(&widget(), 4, Utc::now()).await, Err(SellerError::OutOfStock));
        assert_eq!(inv.available(&widget()).await, 3);
    }

    #[tokio::test]
    async fn confirm_then_cancel_is_rejected() {
        let inv = inventory(10);
        let now = Utc::now();
        let id = inv.reserve(&widget(), 4, now).await.unwrap();
        inv.confirm(id, now).await.unwrap();
        assert_eq!(inv.cancel(id).await, Err(SellerError::AlreadyConfirmed));
    }

    #[tokio::test]
    async fn confirm_twice_is_rejected() {
        let inv = inventory(10);
        let now = Utc::now();
        let id = inv.reserve(&widget(), 4, now).await.unwrap();
        inv.confirm(id, now).await.unwrap();
        assert_eq!(inv.confirm(id, now).await, Err(SellerError::AlreadyConfirmed));
    }

    #[tokio::test]
    async fn cancel_restores_stock_and_is_idempotent_on_replay() {
        let inv = inventory(10);
        let now = Utc::now();
        let id = inv.reserve(&widget(), 4, now).await.unwrap();
        assert_eq!(inv.available(&widget()).await, 6);
        inv.cancel(id).await.unwrap();
        assert_eq!(inv.available(&widget()).await, 10);
        // A second cancel of the same (now-absent) reservation is a no-op success.
        assert_eq!(inv.cancel(id).await, Ok(()));
        assert_eq!(inv.available(&widget()).await, 10);
    }

    #[tokio::test]
    async fn confirm_rejects_an_expired_reservation() {
        let inv = Inventory::new(HashMap::from([(widget(), 10)]), Duration::milliseconds(0));
        let now = Utc::now();
        let id = inv.reserve(&widget(), 4, now).await.unwrap();
        assert_eq!(inv.confirm(id, now + Duration::milliseconds(1)).await, Err(SellerError::ReservationExpired));
    }

    #[tokio::test]
    async fn sweep_restores_stock_for_expired_unconfirmed_reservations_only() {
        let inv = Inventory::new(HashMap::from([(widget(), 10)]), Duration::milliseconds(50));
        let now = Utc::now();
        let confirmed_id = inv.reserve(&widget(), 3, now).await.unwrap();
        inv.confirm(confirmed_id, now).await.unwrap();
        let expiring_id = inv.reserve(&widget(), 2, now).await.unwrap();
        let _ = expiring_id;

        let later = now + Duration::milliseconds(100);
        let swept = inv.sweep_expired(later).await;

        assert_eq!(swept, 1);
        // 10 - 3 confirmed = 7 remain out of circulation; the unconfirmed 2 came back.
        assert_eq!(inv.available(&widget()).await, 9);
        assert_eq!(inv.reservation_count().await, 1);
    }
}
