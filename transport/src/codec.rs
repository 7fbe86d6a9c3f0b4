//! Wire framing: length-delimited frames carrying a JSON-encoded
//! [`Frame`].
//!
//! The original design called for ROUTER-socket-style
//! `<identity><empty><payload>` framing; plain TCP has no socket-level
//! identity routing, so a connection begins with a [`Frame::Hello`]
//! handshake and every later frame on that connection is implicitly
//! attributed to the identity it announced.

use marketplace_core::{Envelope, SellerId};
use serde::{Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;

/// One frame on the wire: either the connection-opening identity handshake
/// or a message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    /// Sent once, immediately after connecting, announcing the sender's
    /// stable identity.
    Hello {
        /// The connecting party's identity.
        identity: SellerId,
    },
    /// A request, response, or heartbeat envelope.
    Message(Envelope),
}

/// Build the length-delimited codec used on every connection.
#[must_use]
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::new()
}

/// Serialize a frame to the bytes a length-delimited codec should carry.
///
/// # Errors
///
/// Returns a JSON serialization error if `frame` cannot be encoded.
pub fn encode(frame: &Frame) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(frame)
}

/// Deserialize a frame from the bytes a length-delimited codec handed
/// back.
///
/// # Errors
///
/// Returns a JSON deserialization error if `bytes` is not a valid frame.
pub fn decode(bytes: &[u8]) -> serde_json::Result<Frame> {
    serde_json::from_slice(bytes)
}
