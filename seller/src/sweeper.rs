//! Periodic background sweeps: reservation expiry and idempotency-cache
//! eviction, run on independent tickers until shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::idempotency::IdempotencyCache;
use crate::inventory::Inventory;

/// Spawn the reservation-expiry sweep, running every `interval` until
/// `shutdown` resolves.
pub fn spawn_expiry_sweep(
    inventory: Arc<Inventory>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let swept = inventory.sweep_expired(Utc::now()).await;
                    if swept > 0 {
                        tracing::info!(swept, "reservation expiry sweep restored stock");
                        metrics::counter!("seller.reservations.expired").increment(swept as u64);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

/// Spawn the idempotency-cache eviction sweep, running every `interval`
/// until `shutdown` resolves.
pub fn spawn_idempotency_sweep(
    idempotency: Arc<IdempotencyCache>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = idempotency.evict_expired(Utc::now()).await;
                    if evicted > 0 {
                        tracing::debug!(evicted, "idempotency cache eviction swept expired entries");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
