//! The saga's working state and the action vocabulary its reducer
//! accepts.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use marketplace_core::{CompensationAction, Order, ProductId, ReservationId, SagaId, SagaState, SellerId};
use serde::{Deserialize, Serialize};

/// Identifies one line item's reservation within a saga: a seller paired
/// with the product reserved against it. An order may contain more than
/// one item for the same seller, so the seller ID alone is not a unique
/// key.
pub type ItemKey = (SellerId, ProductId);

/// The in-memory (and persisted-snapshot) state of one saga instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaData {
    /// This saga's identity, distinct from the order it serves.
    pub saga_id: SagaId,
    /// The order being fulfilled.
    pub order: Order,
    /// Current position in the state machine.
    pub state: SagaState,
    /// Recorded undo actions, in the order they should be replayed in
    /// reverse.
    pub compensations: Vec<CompensationAction>,
    /// Per-line-item reservation ID, populated as reserves succeed.
    pub reservations: HashMap<ItemKey, ReservationId>,
    /// Line items whose reserve or confirm call is still outstanding in
    /// the current phase.
    pub pending: HashSet<ItemKey>,
    /// Recorded once a phase fails, so compensation can report why.
    pub failure_reason: Option<String>,
    /// Set when the overall saga deadline forced compensation, so the
    /// final order status is FAILED rather than CANCELLED.
    pub triggered_by_timeout: bool,
    /// When this saga was created.
    pub created_at: DateTime<Utc>,
    /// When this saga's state was last updated.
    pub updated_at: DateTime<Utc>,
}

impl SagaData {
    /// Start a fresh saga for `order`.
    #[must_use]
    pub fn new(order: Order, now: DateTime<Utc>) -> Self {
        Self {
            saga_id: SagaId::new(),
            order,
            state: SagaState::Started,
            compensations: Vec::new(),
            reservations: HashMap::new(),
            pending: HashSet::new(),
            failure_reason: None,
            triggered_by_timeout: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this saga occupies no durable record once it reaches this
    /// point (terminal and already cleaned up by the driver).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to `next`, recording the update time, enforcing the
    /// transition table, and returning whether the move was accepted.
    #[must_use]
    pub fn transition(&mut self, next: SagaState, now: DateTime<Utc>) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                saga_id = %self.saga_id,
                from = ?self.state,
                to = ?next,
                "rejected invalid saga transition"
            );
            return false;
        }
        self.state = next;
        self.updated_at = now;
        true
    }
}

/// The action vocabulary the saga reducer accepts. Each successful or
/// failed seller response surfaces as one of these.
#[derive(Debug, Clone)]
pub enum SagaAction {
    /// Begin the reserve phase.
    BeginReserve,
    /// A single RESERVE call succeeded.
    ReserveSucceeded {
        /// Seller the reservation was made against.
        seller_id: SellerId,
        /// Product the reservation was made for.
        product_id: ProductId,
        /// Reservation ID the seller assigned.
        reservation_id: ReservationId,
    },
    /// A single RESERVE call failed (peer error, breaker-open, or retries
    /// exhausted).
    ReserveFailed {
        /// Seller whose reservation failed.
        seller_id: SellerId,
        /// Product the reservation was attempted for.
        product_id: ProductId,
        /// Why it failed.
        reason: String,
    },
    /// Begin the confirm phase; only valid once every reserve has
    /// succeeded.
    BeginConfirm,
    /// A single CONFIRM call succeeded.
    ConfirmSucceeded {
        /// Seller that confirmed.
        seller_id: SellerId,
        /// Product the confirmed reservation was for.
        product_id: ProductId,
    },
    /// A single CONFIRM call failed.
    ConfirmFailed {
        /// Seller whose confirmation failed.
        seller_id: SellerId,
        /// Product the confirmation was attempted for.
        product_id: ProductId,
        /// Why it failed.
        reason: String,
    },
    /// Begin unwinding recorded compensations.
    BeginCompensation {
        /// Human-readable cause, recorded on the order.
        reason: String,
    },
    /// All recorded compensations have been attempted.
    CompensationFinished,
    /// The overall saga deadline elapsed before completion.
    TimedOut,
    /// Loaded from a persisted snapshot at coordinator startup. Any
    /// non-terminal saga is driven straight to compensation, since there is
    /// no way to tell whether its in-flight requests landed at the seller.
    Resume,
}
