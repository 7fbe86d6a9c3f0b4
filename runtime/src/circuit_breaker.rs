//! Per-peer circuit breaker: CLOSED/OPEN/HALF_OPEN, guarding calls to a
//! single seller channel.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::RwLock;

/// Tunables for a single breaker instance.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in CLOSED before tripping to OPEN.
    pub failure_threshold: usize,
    /// How long OPEN holds before the next call is allowed to probe.
    pub open_timeout: Duration,
    /// Consecutive successes in HALF_OPEN before returning to CLOSED.
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            success_threshold: 3,
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Default, Clone)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Start from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: CircuitBreakerConfig::default(),
        }
    }

    /// Set the consecutive-failure trip threshold.
    #[must_use]
    pub const fn failure_threshold(mut self, n: usize) -> Self {
        self.config.failure_threshold = n;
        self
    }

    /// Set how long OPEN holds before probing.
    #[must_use]
    pub const fn open_timeout(mut self, timeout: Duration) -> Self {
        self.config.open_timeout = timeout;
        self
    }

    /// Set the consecutive-success recovery threshold.
    #[must_use]
    pub const fn success_threshold(mut self, n: usize) -> Self {
        self.config.success_threshold = n;
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        self.config
    }
}

/// The breaker's current disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Calls pass through normally.
    Closed,
    /// Calls fail fast without reaching the peer.
    Open,
    /// A single probe call is allowed through to test recovery.
    HalfOpen,
}

impl State {
    const fn label(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Error returned by [`CircuitBreaker::call`]: either the breaker rejected
/// the call outright, or the wrapped operation itself failed.
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The breaker is OPEN and not yet due for a probe attempt.
    #[error("circuit breaker open")]
    Open,
    /// The call was attempted and the operation returned an error.
    #[error(transparent)]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    /// Whether this variant is the fail-fast rejection rather than a
    /// forwarded inner error.
    #[must_use]
    pub const fn is_breaker_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

#[derive(Debug)]
struct CircuitBreakerState {
    state: State,
    failure_count: usize,
    success_count: usize,
    last_failure_time: Option<Instant>,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: State::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
        }
    }
}

/// Aggregate call counters for introspection.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerMetrics {
    /// Calls that entered `call` (rejected or not).
    pub total_calls: u64,
    /// Calls whose inner operation succeeded.
    pub total_successes: u64,
    /// Calls whose inner operation failed.
    pub total_failures: u64,
    /// Calls rejected while the breaker was OPEN.
    pub total_rejections: u64,
}

impl CircuitBreakerMetrics {
    /// Fraction of attempted (non-rejected) calls that succeeded.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let attempted = self.total_successes + self.total_failures;
        if attempted == 0 {
            1.0
        } else {
            self.total_successes as f64 / attempted as f64
        }
    }

    /// Fraction of all calls that were rejected fail-fast.
    #[must_use]
    pub fn rejection_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.total_rejections as f64 / self.total_calls as f64
        }
    }
}

/// A single breaker guarding calls to one peer.
pub struct CircuitBreaker {
    peer: String,
    config: Arc<CircuitBreakerConfig>,
    state: Arc<RwLock<CircuitBreakerState>>,
    total_calls: Arc<AtomicU64>,
    total_successes: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    total_rejections: Arc<AtomicU64>,
}

impl CircuitBreaker {
    /// Create a new breaker for `peer` with `config`.
    #[must_use]
    pub fn new(peer: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            peer: peer.into(),
            config: Arc::new(config),
            state: Arc::new(RwLock::new(CircuitBreakerState::default())),
            total_calls: Arc::new(AtomicU64::new(0)),
            total_successes: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            total_rejections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The breaker's current state.
    pub async fn state(&self) -> State {
        self.state.read().await.state
    }

    /// Run `operation` through the breaker, failing fast with
    /// [`CircuitBreakerError::Open`] if the breaker is OPEN and not yet due
    /// for a probe.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitBreakerError::Open`] if the breaker rejects the
    /// call, or [`CircuitBreakerError::Inner`] if `operation` itself fails.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        if !self.can_attempt().await {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            return Err(CircuitBreakerError::Open);
        }

        match operation().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(err) => {
                self.on_failure().await;
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    async fn can_attempt(&self) -> bool {
        let mut guard = self.state.write().await;
        match guard.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let elapsed = guard
                    .last_failure_time
                    .is_some_and(|t| t.elapsed() >= self.config.open_timeout);
                if elapsed {
                    self.transition(&mut guard, State::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    async fn on_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.state.write().await;
        match guard.state {
            State::Closed => {
                guard.failure_count = 0;
            }
            State::HalfOpen => {
                guard.success_count += 1;
                if guard.success_count >= self.config.success_threshold {
                    guard.failure_count = 0;
                    guard.success_count = 0;
                    self.transition(&mut guard, State::Closed);
                }
            }
            State::Open => {}
        }
    }

    async fn on_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.state.write().await;
        guard.last_failure_time = Some(Instant::now());
        match guard.state {
            State::Closed => {
                guard.failure_count += 1;
                if guard.failure_count >= self.config.failure_threshold {
                    self.transition(&mut guard, State::Open);
                }
            }
            State::HalfOpen => {
                guard.success_count = 0;
                self.transition(&mut guard, State::Open);
            }
            State::Open => {}
        }
    }

    fn transition(&self, guard: &mut CircuitBreakerState, next: State) {
        let from = guard.state;
        guard.state = next;
        tracing::info!(peer = %self.peer, from = from.label(), to = next.label(), "circuit breaker state change");
        metrics::counter!(
            "circuit_breaker.state_change",
            "peer" => self.peer.clone(),
            "from" => from.label(),
            "to" => next.label()
        )
        .increment(1);
    }

    /// Snapshot the call counters.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Reset to CLOSED with zeroed counters. Intended for tests.
    pub async fn reset(&self) {
        let mut guard = self.state.write().await;
        *guard = CircuitBreakerState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(failure_threshold: usize) -> CircuitBreakerConfig {
        CircuitBreakerConfigBuilder::new()
            .failure_threshold(failure_threshold)
            .open_timeout(Duration::from_millis(50))
            .success_threshold(2)
            .build()
    }

    #[tokio::test]
    async fn starts_closed() {
        let breaker = CircuitBreaker::new("seller-1", config(3));
        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("seller-1", config(3));
        for _ in 0..3 {
            let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(breaker.state().await, State::Open);
    }

    #[tokio::test]
    async fn rejects_fast_while_open() {
        let breaker = CircuitBreaker::new("seller-1", config(1));
        let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(breaker.state().await, State::Open);
        let result = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open)));
    }

    #[tokio::test]
    async fn half_opens_after_timeout() {
        let breaker = CircuitBreaker::new("seller-1", config(1));
        let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        let result = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn closes_after_success_threshold_in_half_open() {
        let breaker = CircuitBreaker::new("seller-1", config(1));
        let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        let _ = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        assert_eq!(breaker.state().await, State::HalfOpen);
        let _ = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("seller-1", config(1));
        let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        let _ = breaker.call(|| async { Err::<(), _>("boom again") }).await;
        assert_eq!(breaker.state().await, State::Open);
    }

    #[tokio::test]
    async fn metrics_track_calls() {
        let breaker = CircuitBreaker::new("seller-1", config(5));
        let _ = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        let metrics = breaker.metrics();
        assert_eq!(metrics.total_calls, 2);
        assert_eq!(metrics.total_successes, 1);
        assert_eq!(metrics.total_failures, 1);
    }

    #[tokio::test]
    async fn reset_returns_to_closed() {
        let breaker = CircuitBreaker::new("seller-1", config(1));
        let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(breaker.state().await, State::Open);
        breaker.reset().await;
        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn closed_failure_below_threshold_stays_closed() {
        let breaker = CircuitBreaker::new("seller-1", config(3));
        let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(breaker.state().await, State::Closed);
    }
}
