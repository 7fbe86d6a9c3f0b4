//! A seller participant: idempotent RESERVE/CONFIRM/CANCEL handling over
//! per-product inventory with reservation expiry, dialed in to a
//! coordinator's transport broker.

pub mod config;
pub mod error;
pub mod handler;
pub mod idempotency;
pub mod inventory;
pub mod service;
pub mod sweeper;

pub use config::SellerConfig;
pub use error::SellerError;
pub use idempotency::IdempotencyCache;
pub use inventory::Inventory;
pub use service::SellerService;
