//! Wires a dialed [`SellerConnection`] to the handler and background
//! sweeps: the seller process's main loop.

use std::sync::Arc;
use std::time::Duration;

use marketplace_core::SellerId;
use marketplace_transport::SellerConnection;

use crate::config::SellerConfig;
use crate::idempotency::IdempotencyCache;
use crate::inventory::Inventory;
use crate::{handler, sweeper};

/// A running seller process: the connection to the coordinator plus its
/// inventory and idempotency state.
pub struct SellerService {
    identity: SellerId,
    connection: SellerConnection,
    inventory: Arc<Inventory>,
    idempotency: Arc<IdempotencyCache>,
}

impl SellerService {
    /// Dial the coordinator named in `config` and seed local state.
    ///
    /// # Errors
    ///
    /// Returns [`marketplace_transport::TransportError`] if the connection
    /// cannot be established.
    pub async fn connect(config: &SellerConfig) -> Result<Self, marketplace_transport::TransportError> {
        let identity = SellerId::from(config.seller_id.clone());
        let connection = SellerConnection::connect(identity.clone(), config.coordinator_addr).await?;
        let inventory = Arc::new(Inventory::new(
            config.initial_stock.clone(),
            chrono::Duration::milliseconds(i64::try_from(config.reservation_timeout_ms).unwrap_or(i64::MAX)),
        ));
        let idempotency = Arc::new(IdempotencyCache::new(chrono::Duration::milliseconds(
            i64::try_from(config.idempotency_retention_time_ms).unwrap_or(i64::MAX),
        )));
        Ok(Self {
            identity,
            connection,
            inventory,
            idempotency,
        })
    }

    /// Run the request loop plus background heartbeat and sweep tasks until
    /// the connection closes or `shutdown` resolves.
    pub async fn run(mut self, config: SellerConfig, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let expiry_shutdown = shutdown.clone();
        let idempotency_shutdown = shutdown.clone();

        let heartbeat_interval = Duration::from_secs(config.heartbeat_interval_seconds);
        let cleanup_interval = Duration::from_secs(config.cleanup_interval_seconds);

        let expiry_task = sweeper::spawn_expiry_sweep(Arc::clone(&self.inventory), cleanup_interval, expiry_shutdown);
        let idempotency_task =
            sweeper::spawn_idempotency_sweep(Arc::clone(&self.idempotency), cleanup_interval, idempotency_shutdown);

        tracing::info!(seller_id = %self.identity, "seller connected and serving requests");

        let mut heartbeat_ticker = tokio::time::interval(heartbeat_interval);
        heartbeat_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = self.connection.recv() => {
                    let Some(request) = request else {
                        tracing::info!(seller_id = %self.identity, "coordinator connection closed");
                        break;
                    };
                    let response = handler::dispatch(&request, &self.identity, &self.inventory, &self.idempotency).await;
                    if let Err(error) = self.connection.respond(response) {
                        tracing::warn!(seller_id = %self.identity, %error, "failed to send response");
                        break;
                    }
                }
                _ = heartbeat_ticker.tick() => {
                    if self.connection.send_heartbeat().is_err() {
                        tracing::warn!(seller_id = %self.identity, "heartbeat send failed, connection likely closed");
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!(seller_id = %self.identity, "shutdown requested");
                        break;
                    }
                }
            }
        }

        expiry_task.abort();
        idempotency_task.abort();
    }
}
