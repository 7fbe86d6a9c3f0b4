//! Ambient dependencies the saga reducer reads while building effects:
//! the transport sender, one circuit breaker per seller (shared across
//! every saga, not per-instance), the retry policy, the durable store, and
//! the clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use marketplace_core::{Clock, SellerId, SystemClock};
use marketplace_runtime::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
use marketplace_transport::RequestSender;
use tokio::sync::RwLock;

use crate::store::SagaStore;

/// Per-peer circuit breakers, created lazily on first use and kept for the
/// lifetime of the coordinator process so trip state survives across
/// sagas — one breaker per coordinator-to-seller channel.
#[derive(Default)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<SellerId, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Build a registry that mints new breakers with `config`.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the breaker for `seller_id`, creating it on first use.
    pub async fn get(&self, seller_id: &SellerId) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().await.get(seller_id) {
            return Arc::clone(existing);
        }
        let mut guard = self.breakers.write().await;
        Arc::clone(
            guard
                .entry(seller_id.clone())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(seller_id.to_string(), self.config.clone()))),
        )
    }
}

/// Read-only dependencies every saga's [`crate::orchestrator::SagaReducer`]
/// shares. Cheap to clone: every field is an `Arc` (or `Copy` duration),
/// so one environment value is constructed by the coordinator runtime and
/// handed to a fresh [`marketplace_runtime::Store`] per saga.
#[derive(Clone)]
pub struct SagaEnvironment {
    /// How to reach sellers.
    pub sender: Arc<dyn RequestSender>,
    /// Shared per-peer breakers.
    pub breakers: Arc<BreakerRegistry>,
    /// Backoff parameters for RESERVE/CONFIRM/CANCEL calls.
    pub retry_policy: RetryPolicy,
    /// Durable saga snapshot store.
    pub store: Arc<dyn SagaStore>,
    /// Source of "now" for timestamps and transition bookkeeping.
    pub clock: Arc<dyn Clock>,
    /// Per-transport-call timeout.
    pub request_timeout: Duration,
    /// Per-phase (reserve-all / confirm-all) deadline, wrapping retries
    /// for a single item.
    pub phase_timeout: Duration,
}

impl SagaEnvironment {
    /// Build an environment with the real system clock.
    #[must_use]
    pub fn new(
        sender: Arc<dyn RequestSender>,
        breaker_config: CircuitBreakerConfig,
        retry_policy: RetryPolicy,
        store: Arc<dyn SagaStore>,
        request_timeout: Duration,
        phase_timeout: Duration,
    ) -> Self {
        Self {
            sender,
            breakers: Arc::new(BreakerRegistry::new(breaker_config)),
            retry_policy,
            store,
            clock: Arc::new(SystemClock),
            request_timeout,
            phase_timeout,
        }
    }

    /// Override the clock, for deterministic tests.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
