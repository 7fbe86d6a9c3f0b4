//! Identity-routed async duplex transport over TCP.
//!
//! The coordinator side ([`broker::TransportBroker`]) accepts connections
//! from sellers and routes outgoing requests by identity, matching
//! responses back by correlation ID. The seller side
//! ([`connector::SellerConnection`]) dials the coordinator once and
//! exposes a stream of incoming requests plus a response/heartbeat sink.

pub mod broker;
pub mod codec;
pub mod connector;
pub mod error;
pub mod pending;
pub mod sender;

pub use broker::{TransportBroker, DEFAULT_REQUEST_TIMEOUT};
pub use connector::SellerConnection;
pub use error::TransportError;
pub use pending::PendingTable;
pub use sender::RequestSender;
