//! Retry-with-exponential-backoff, with classification of which errors are
//! worth retrying at all.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Backoff parameters for [`retry_with_backoff`] and
/// [`retry_with_classify`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of additional attempts after the first.
    pub max_retries: usize,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling on any computed delay.
    pub max_delay: Duration,
    /// Exponential growth factor applied per attempt.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Default, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Start from the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            policy: RetryPolicy::default(),
        }
    }

    /// Set the maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, n: usize) -> Self {
        self.policy.max_retries = n;
        self
    }

    /// Set the initial (first-retry) delay.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Set the delay ceiling.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set the exponential growth multiplier.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

impl RetryPolicy {
    /// The base delay for attempt `attempt` (0-based), before jitter,
    /// capped at `max_delay`.
    #[must_use]
    pub fn base_delay_for_attempt(&self, attempt: usize) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// The jittered delay for attempt `attempt`: a zero-mean Gaussian at
    /// 10% standard deviation around the base delay, clamped to
    /// `[0, max_delay]`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        jitter(base, self.max_delay)
    }
}

fn jitter(base: Duration, max_delay: Duration) -> Duration {
    let base_secs = base.as_secs_f64();
    let stddev = base_secs * 0.1;
    let sampled = if stddev > 0.0 {
        #[allow(clippy::unwrap_used)]
        let normal = Normal::new(base_secs, stddev).unwrap_or_else(|_| {
            #[allow(clippy::unwrap_used)]
            Normal::new(base_secs, 0.0).unwrap()
        });
        normal.sample(&mut rand::thread_rng())
    } else {
        base_secs
    };
    let clamped = sampled.max(0.0).min(max_delay.as_secs_f64());
    Duration::from_secs_f64(clamped)
}

/// Classifies whether an error is worth retrying. Implemented by each
/// crate's own error taxonomy so every call site agrees on what "terminal"
/// means.
pub trait RetryClassify {
    /// Whether this error should trigger another attempt rather than
    /// surfacing immediately.
    fn is_retryable(&self) -> bool;
}

/// Retry `operation` up to `policy.max_retries` additional times,
/// classifying errors with `E`'s [`RetryClassify`] impl and sleeping
/// between attempts per [`RetryPolicy::delay_for_attempt`].
///
/// # Errors
///
/// Returns the last error seen, whether the final attempt exhausted
/// retries or a terminal (non-retryable) error ended the loop early.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryClassify + std::fmt::Display,
{
    retry_with_classify(policy, operation.by_ref(), RetryClassify::is_retryable).await
}

/// Like [`retry_with_backoff`] but with an explicit retry predicate instead
/// of relying on the error type's [`RetryClassify`] impl.
///
/// # Errors
///
/// Returns the last error seen, whether the final attempt exhausted
/// retries or `is_retryable` rejected the error early.
pub async fn retry_with_classify<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0usize;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::warn!(attempt, error = %err, "terminal error, not retrying");
                    return Err(err);
                }
                if attempt >= policy.max_retries {
                    tracing::error!(attempt, error = %err, "retries exhausted");
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt);
                tracing::info!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after delay");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Boom(&'static str, bool);

    impl std::fmt::Display for Boom {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl RetryClassify for Boom {
        fn is_retryable(&self) -> bool {
            self.1
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicyBuilder::new()
            .max_retries(3)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(20))
            .multiplier(2.0)
            .build()
    }

    #[test]
    fn base_delay_caps_at_max() {
        let policy = RetryPolicyBuilder::new()
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(5))
            .multiplier(2.0)
            .build();
        assert_eq!(policy.base_delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.base_delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.base_delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.base_delay_for_attempt(3), Duration::from_secs(5));
        assert_eq!(policy.base_delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn jittered_delay_stays_in_bounds() {
        let policy = fast_policy();
        for attempt in 0..5 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay <= policy.max_delay);
        }
    }

    #[tokio::test]
    async fn succeeds_first_try_without_sleeping() {
        let policy = fast_policy();
        let result: Result<_, Boom> = retry_with_backoff(&policy, || async { Ok::<_, Boom>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let policy = fast_policy();
        let attempts = AtomicUsize::new(0);
        let result = retry_with_backoff(&policy, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Boom("transient", true))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn exhausts_retries_and_returns_last_error() {
        let policy = fast_policy();
        let attempts = AtomicUsize::new(0);
        let result: Result<i32, Boom> = retry_with_backoff(&policy, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Boom("always fails", true)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), policy.max_retries + 1);
    }

    #[tokio::test]
    async fn terminal_error_skips_retrying() {
        let policy = fast_policy();
        let attempts = AtomicUsize::new(0);
        let result: Result<i32, Boom> = retry_with_backoff(&policy, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Boom("terminal", false)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
