//! Seller process configuration, loaded from environment variables with
//! documented defaults, mirroring the coordinator's `Config::from_env`.

use std::collections::HashMap;
use std::net::SocketAddr;

use marketplace_core::ProductId;

/// Default reservation expiry: 5 minutes.
pub const DEFAULT_RESERVATION_TIMEOUT_MS: u64 = 5 * 60 * 1000;
/// Default expiry-sweep interval: 60 seconds.
pub const DEFAULT_CLEANUP_INTERVAL_SECONDS: u64 = 60;
/// Default idempotency retention window: 30 minutes.
pub const DEFAULT_IDEMPOTENCY_RETENTION_TIME_MS: u64 = 30 * 60 * 1000;
/// Default heartbeat interval: 30 seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 30;

/// Everything a seller process needs to dial the coordinator and run its
/// local inventory.
#[derive(Debug, Clone)]
pub struct SellerConfig {
    /// This seller's identity, also its transport handshake identity.
    pub seller_id: String,
    /// Coordinator's transport bind address.
    pub coordinator_addr: SocketAddr,
    /// Seller-side reservation expiry, in milliseconds.
    pub reservation_timeout_ms: u64,
    /// Expiry-sweep interval, in seconds.
    pub cleanup_interval_seconds: u64,
    /// Idempotency cache retention window, in milliseconds.
    pub idempotency_retention_time_ms: u64,
    /// Heartbeat send interval, in seconds.
    pub heartbeat_interval_seconds: u64,
    /// Initial per-product stock, keyed by product ID.
    pub initial_stock: HashMap<ProductId, u32>,
}

impl SellerConfig {
    /// Load configuration from environment variables, falling back to the
    /// documented defaults for anything unset or unparseable.
    ///
    /// Recognized variables: `SELLER_ID`, `COORDINATOR_ADDR`,
    /// `RESERVATION_TIMEOUT_MS`, `CLEANUP_INTERVAL_SECONDS`,
    /// `IDEMPOTENCY_RETENTION_TIME_MS`, `HEARTBEAT_INTERVAL_SECONDS`, and
    /// `SELLER_INITIAL_STOCK` (a JSON object mapping product ID to starting
    /// quantity).
    ///
    /// An unparseable `COORDINATOR_ADDR` falls back to the default address
    /// with a warning rather than failing construction.
    #[must_use]
    pub fn from_env() -> Self {
        let default_addr: SocketAddr = "127.0.0.1:5555".parse().unwrap_or_else(|_| unreachable!("literal socket address always parses"));
        let coordinator_addr = std::env::var("COORDINATOR_ADDR").ok().and_then(|raw| match raw.parse() {
            Ok(addr) => Some(addr),
            Err(error) => {
                tracing::warn!(%raw, %error, "invalid COORDINATOR_ADDR, falling back to default");
                None
            }
        });
        Self {
            seller_id: std::env::var("SELLER_ID").unwrap_or_else(|_| "seller-1".to_string()),
            coordinator_addr: coordinator_addr.unwrap_or(default_addr),
            reservation_timeout_ms: parse_env("RESERVATION_TIMEOUT_MS", DEFAULT_RESERVATION_TIMEOUT_MS),
            cleanup_interval_seconds: parse_env("CLEANUP_INTERVAL_SECONDS", DEFAULT_CLEANUP_INTERVAL_SECONDS),
            idempotency_retention_time_ms: parse_env("IDEMPOTENCY_RETENTION_TIME_MS", DEFAULT_IDEMPOTENCY_RETENTION_TIME_MS),
            heartbeat_interval_seconds: parse_env("HEARTBEAT_INTERVAL_SECONDS", DEFAULT_HEARTBEAT_INTERVAL_SECONDS),
            initial_stock: std::env::var("SELLER_INITIAL_STOCK")
                .ok()
                .and_then(|raw| serde_json::from_str::<HashMap<String, u32>>(&raw).ok())
                .map(|raw| raw.into_iter().map(|(product, qty)| (ProductId::from(product), qty)).collect())
                .unwrap_or_default(),
        }
    }
}

fn parse_env(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}
