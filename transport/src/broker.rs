//! Coordinator-side transport: accepts seller connections, routes
//! outgoing requests by identity, and matches responses to their request
//! by correlation ID.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use marketplace_core::{CorrelationId, Envelope, MessageKind, OrderId, Payload, SellerId};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::codec::{frame_codec, Frame};
use crate::error::TransportError;
use crate::pending::PendingTable;

/// Default per-request timeout, per the external interface defaults.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

struct PeerConnection {
    outbox: mpsc::UnboundedSender<Bytes>,
}

/// Owns every accepted seller connection and the table of requests
/// awaiting a response.
pub struct TransportBroker {
    own_id: SellerId,
    connections: Mutex<HashMap<SellerId, PeerConnection>>,
    pending: PendingTable,
}

impl TransportBroker {
    /// Construct a broker identified as `own_id` on the wire.
    #[must_use]
    pub fn new(own_id: SellerId) -> Self {
        Self {
            own_id,
            connections: Mutex::new(HashMap::new()),
            pending: PendingTable::new(),
        }
    }

    /// Bind `addr` and accept seller connections until the listener
    /// errors. Each connection is handled on its own task.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError::Send`] if the listener cannot be bound.
    pub async fn run(self: std::sync::Arc<Self>, addr: SocketAddr) -> Result<(), TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Send {
                peer: addr.to_string(),
                reason: e.to_string(),
            })?;
        tracing::info!(%addr, "transport broker listening");
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(error) => {
                    tracing::warn!(%error, "accept failed");
                    continue;
                }
            };
            let broker = std::sync::Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(error) = broker.handle_connection(stream).await {
                    tracing::warn!(%peer_addr, %error, "connection terminated");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<(), TransportError> {
        let mut framed = Framed::new(stream, frame_codec());

        let identity = match framed.next().await {
            Some(Ok(bytes)) => match crate::codec::decode(&bytes) {
                Ok(Frame::Hello { identity }) => identity,
                Ok(_) => {
                    return Err(TransportError::MalformedFrame {
                        peer: "unknown".into(),
                        reason: "expected Hello as first frame".into(),
                    })
                }
                Err(error) => {
                    return Err(TransportError::MalformedFrame {
                        peer: "unknown".into(),
                        reason: error.to_string(),
                    })
                }
            },
            _ => {
                return Err(TransportError::MalformedFrame {
                    peer: "unknown".into(),
                    reason: "connection closed before handshake".into(),
                })
            }
        };

        tracing::info!(peer = %identity, "seller connected");

        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        {
            #[allow(clippy::unwrap_used)]
            let mut guard = self.connections.lock().unwrap();
            guard.insert(identity.clone(), PeerConnection { outbox: tx });
        }

        self.connection_loop(identity.clone(), framed, rx).await;

        #[allow(clippy::unwrap_used)]
        {
            let mut guard = self.connections.lock().unwrap();
            guard.remove(&identity);
        }
        tracing::info!(peer = %identity, "seller disconnected");
        Ok(())
    }

    async fn connection_loop(
        &self,
        identity: SellerId,
        mut framed: Framed<TcpStream, tokio_util::codec::LengthDelimitedCodec>,
        mut outbox: mpsc::UnboundedReceiver<Bytes>,
    ) {
        loop {
            tokio::select! {
                incoming = framed.next() => {
                    match incoming {
                        Some(Ok(bytes)) => self.dispatch_incoming(&identity, &bytes),
                        Some(Err(error)) => {
                            tracing::warn!(peer = %identity, %error, "frame decode error");
                        }
                        None => break,
                    }
                }
                outgoing = outbox.recv() => {
                    match outgoing {
                        Some(bytes) => {
                            if let Err(error) = framed.send(bytes).await {
                                tracing::warn!(peer = %identity, %error, "write failed");
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }

    fn dispatch_incoming(&self, identity: &SellerId, bytes: &[u8]) {
        match crate::codec::decode(bytes) {
            Ok(Frame::Message(envelope)) => {
                if envelope.kind == MessageKind::Heartbeat {
                    tracing::debug!(peer = %identity, "heartbeat received");
                    return;
                }
                if !self.pending.complete(&envelope.correlation_id, envelope.clone()) {
                    tracing::debug!(
                        peer = %identity,
                        correlation_id = %envelope.correlation_id,
                        "response for unknown or already-timed-out correlation id dropped"
                    );
                }
            }
            Ok(Frame::Hello { .. }) => {
                tracing::warn!(peer = %identity, "unexpected Hello after handshake, ignoring");
            }
            Err(error) => {
                tracing::warn!(peer = %identity, %error, "malformed frame discarded");
            }
        }
    }

    /// Send a request to `peer` and await its response, or fail with a
    /// timeout/transport error.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PeerUnavailable`] if the peer is not
    /// connected, [`TransportError::Timeout`] if no response arrives
    /// before `timeout`, or [`TransportError::Send`] if the frame could
    /// not be written.
    pub async fn send_request(
        &self,
        peer: &SellerId,
        kind: MessageKind,
        order_id: Option<OrderId>,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Envelope, TransportError> {
        let envelope = Envelope::request(kind, self.own_id.clone(), order_id, payload, chrono::Utc::now());
        self.send_with_envelope(peer, envelope, timeout).await
    }

    /// Like [`Self::send_request`] but reuses a caller-supplied envelope so
    /// retries of the same logical request keep a stable message ID while
    /// minting a fresh correlation ID per attempt.
    ///
    /// # Errors
    ///
    /// Same as [`Self::send_request`].
    pub async fn send_with_envelope(
        &self,
        peer: &SellerId,
        mut envelope: Envelope,
        timeout: Duration,
    ) -> Result<Envelope, TransportError> {
        envelope.correlation_id = CorrelationId::new();
        let correlation_id = envelope.correlation_id.clone();

        let outbox = {
            #[allow(clippy::unwrap_used)]
            let guard = self.connections.lock().unwrap();
            guard.get(peer).map(|c| c.outbox.clone())
        };
        let Some(outbox) = outbox else {
            return Err(TransportError::PeerUnavailable {
                peer: peer.to_string(),
            });
        };

        let rx = self.pending.insert(correlation_id.clone());

        let bytes = crate::codec::encode(&Frame::Message(envelope))
            .map_err(|e| TransportError::Send {
                peer: peer.to_string(),
                reason: e.to_string(),
            })?;
        if outbox.send(Bytes::from(bytes)).is_err() {
            self.pending.remove(&correlation_id);
            return Err(TransportError::PeerUnavailable {
                peer: peer.to_string(),
            });
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::BrokerShutdown),
            Err(_) => {
                self.pending.remove(&correlation_id);
                Err(TransportError::Timeout {
                    peer: peer.to_string(),
                })
            }
        }
    }

    /// Fail every outstanding request and drop all connections. Called
    /// during cooperative shutdown.
    pub fn shutdown(&self) {
        self.pending.clear();
        #[allow(clippy::unwrap_used)]
        let mut guard = self.connections.lock().unwrap();
        guard.clear();
    }
}
