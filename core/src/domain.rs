//! Domain types shared by the transport, saga, and seller crates: order and
//! reservation records, saga state, and the identifiers that tie them
//! together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub String);

        impl $name {
            /// Borrow the inner string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

macro_rules! uuid_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            /// Mint a fresh random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(OrderId, "Identifies an order, unique within a coordinator.");
string_id!(SellerId, "Identifies a seller participant; doubles as its transport identity.");
string_id!(ProductId, "Identifies a product within a seller's catalog.");
string_id!(CustomerId, "Identifies the customer who placed an order.");
string_id!(MarketplaceId, "Identifies the marketplace a coordinator instance serves.");

uuid_id!(SagaId, "Identifies a saga instance, distinct from its order so retries can mint fresh sagas for the same order.");
uuid_id!(ReservationId, "Identifies a single reservation held by a seller.");
uuid_id!(MessageId, "Idempotency key, stable across retries of the same logical request.");
uuid_id!(CorrelationId, "Routes a transport response back to the request awaiting it.");

/// A line item within an order: a quantity of one product, to be sourced
/// from one seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Product being ordered.
    pub product_id: ProductId,
    /// Seller this item must be reserved against.
    pub seller_id: SellerId,
    /// Quantity requested; always positive.
    pub quantity: u32,
}

/// A customer order, immutable apart from its `status` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier.
    pub order_id: OrderId,
    /// Customer who placed the order.
    pub customer_id: CustomerId,
    /// Marketplace this order was placed through.
    pub marketplace_id: MarketplaceId,
    /// Line items, one per (product, seller) pair.
    pub items: Vec<OrderItem>,
    /// When the order was accepted.
    pub created_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: OrderStatus,
}

/// The customer-visible lifecycle of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted, not yet submitted to the orchestrator.
    Created,
    /// Reserve phase in progress.
    Reserving,
    /// All line items reserved; about to confirm.
    AllReserved,
    /// Confirm phase in progress.
    Confirming,
    /// All confirmations succeeded.
    Completed,
    /// Rolling back a partially executed saga.
    Compensating,
    /// Compensation finished; order will not be fulfilled.
    Cancelled,
    /// Unrecoverable failure (timeout, protocol error, or a compensation
    /// that could not be verified).
    Failed,
}

/// A seller-side hold on stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Identifier assigned by the seller when the reservation was created.
    pub reservation_id: ReservationId,
    /// Product this reservation holds stock for.
    pub product_id: ProductId,
    /// Quantity held.
    pub quantity: u32,
    /// Whether the reservation has been confirmed into a permanent sale.
    pub confirmed: bool,
    /// When an unconfirmed reservation is eligible for the expiry sweep.
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Whether this reservation has passed `expires_at` as of `now` and
    /// has not been confirmed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.confirmed && now >= self.expires_at
    }
}

/// The saga orchestrator's state machine. See the transition table this
/// type enforces in the orchestrator module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaState {
    /// Saga accepted, reserve phase not yet started.
    Started,
    /// Reserve requests outstanding.
    Reserving,
    /// Every line item successfully reserved.
    ProductsReserved,
    /// Confirm requests outstanding.
    Confirming,
    /// All confirmations succeeded. Terminal.
    Completed,
    /// Compensation in progress.
    Compensating,
    /// Compensation finished for every recorded action. Terminal.
    CompensationCompleted,
    /// Unrecoverable. Terminal.
    Failed,
}

impl SagaState {
    /// Whether this state has no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompensationCompleted | Self::Failed
        )
    }

    /// Whether `self -> next` is a permitted transition per the
    /// orchestrator's state table.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Started, Self::Reserving)
                | (Self::Started, Self::Failed)
                | (Self::Reserving, Self::ProductsReserved)
                | (Self::Reserving, Self::Compensating)
                | (Self::Reserving, Self::Failed)
                | (Self::ProductsReserved, Self::Confirming)
                | (Self::ProductsReserved, Self::Compensating)
                | (Self::Confirming, Self::Completed)
                | (Self::Confirming, Self::Compensating)
                | (Self::Compensating, Self::CompensationCompleted)
                | (Self::Compensating, Self::Failed)
        )
    }
}

/// A recorded undo action, accumulated as the reserve phase succeeds and
/// replayed in reverse during compensation. Polymorphic over action kinds
/// so the compensation loop stays a single match even as kinds are added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompensationAction {
    /// Cancel a reservation previously confirmed as successful.
    CancelReservation {
        /// Seller the reservation was made against.
        seller_id: SellerId,
        /// Reservation to cancel.
        reservation_id: ReservationId,
    },
}
