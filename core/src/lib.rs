//! Core traits and domain types shared across the marketplace saga
//! workspace.
//!
//! This crate is deliberately free of I/O: it defines the functional-core
//! seam (`Reducer`, `Effect`, `Clock`) that drivers elsewhere in the
//! workspace execute against, plus the order/reservation/saga domain model
//! and the wire envelope both sides of the transport agree on.

pub mod domain;
pub mod effect;
pub mod environment;
pub mod envelope;
pub mod reducer;

pub use domain::{
    CompensationAction, CorrelationId, CustomerId, MarketplaceId, MessageId, Order, OrderId,
    OrderItem, OrderStatus, ProductId, Reservation, ReservationId, SagaId, SagaState, SellerId,
};
pub use effect::Effect;
pub use environment::{Clock, SystemClock};
pub use envelope::{Envelope, MessageKind, Payload};
pub use reducer::Reducer;
