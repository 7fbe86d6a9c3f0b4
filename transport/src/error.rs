//! Transport error taxonomy.

use marketplace_runtime::RetryClassify;
use thiserror::Error;

/// Errors raised sending a request or running the transport's connection
/// machinery.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No response arrived before the per-request deadline.
    #[error("request timed out waiting for response from {peer}")]
    Timeout {
        /// The peer the request was addressed to.
        peer: String,
    },
    /// The underlying socket write or connection setup failed.
    #[error("send failed to {peer}: {reason}")]
    Send {
        /// The peer the request was addressed to.
        peer: String,
        /// Underlying I/O or codec failure description.
        reason: String,
    },
    /// The peer is not currently connected.
    #[error("peer {peer} is not connected")]
    PeerUnavailable {
        /// The peer that was addressed.
        peer: String,
    },
    /// A frame could not be decoded; dropped without failing the pending
    /// request (it will time out naturally if it was the awaited reply).
    #[error("malformed frame from {peer}: {reason}")]
    MalformedFrame {
        /// The peer the frame arrived from.
        peer: String,
        /// Why decoding failed.
        reason: String,
    },
    /// The peer responded with an explicit application-level error.
    #[error("peer {peer} returned an error: {reason}")]
    PeerError {
        /// The peer that responded.
        peer: String,
        /// The reason given by the peer.
        reason: String,
    },
    /// The transport is shutting down; the request will never complete.
    #[error("transport is shutting down")]
    BrokerShutdown,
}

impl RetryClassify for TransportError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Send { .. } | Self::PeerUnavailable { .. } => true,
            Self::MalformedFrame { .. } | Self::PeerError { .. } | Self::BrokerShutdown => false,
        }
    }
}
