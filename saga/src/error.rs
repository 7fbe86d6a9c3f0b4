//! Saga-level error taxonomy, composing the transport and persistence
//! error types via `?`.

use marketplace_runtime::{CircuitBreakerError, RetryClassify};
use marketplace_transport::TransportError;
use thiserror::Error;

use crate::store::SagaStoreError;

/// Errors that can escape the saga orchestrator.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A transport call failed after retries were exhausted or returned a
    /// terminal error.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The saga state store failed to persist or load a snapshot.
    #[error(transparent)]
    Store(#[from] SagaStoreError),
    /// An invalid state-machine transition was attempted; indicates a bug.
    #[error("invalid saga transition: {0}")]
    Protocol(String),
    /// The overall saga deadline elapsed.
    #[error("saga timed out")]
    TimedOut,
}

/// A single RESERVE/CONFIRM/CANCEL attempt's error, after the circuit
/// breaker has had a chance to reject it outright. Retried by
/// [`marketplace_runtime::retry_with_classify`]; the breaker-open variant
/// is always terminal for the current attempt.
#[derive(Debug, Error)]
pub enum CallError {
    /// The peer's breaker is OPEN and not yet due for a probe.
    #[error("circuit breaker open for {peer}")]
    BreakerOpen {
        /// The peer whose breaker rejected the call.
        peer: String,
    },
    /// The transport call itself failed or the peer returned an explicit
    /// error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CallError {
    pub(crate) fn from_breaker(peer: &str, error: CircuitBreakerError<TransportError>) -> Self {
        match error {
            CircuitBreakerError::Open => Self::BreakerOpen { peer: peer.to_string() },
            CircuitBreakerError::Inner(inner) => Self::Transport(inner),
        }
    }
}

impl RetryClassify for CallError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::BreakerOpen { .. } => false,
            Self::Transport(inner) => inner.is_retryable(),
        }
    }
}
