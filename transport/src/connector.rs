//! Seller-side transport: a single outbound connection to the coordinator,
//! used to receive requests and send responses and heartbeats.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use marketplace_core::{Envelope, MessageKind, Payload, SellerId};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::codec::{frame_codec, Frame};
use crate::error::TransportError;

/// A connected seller's handle to the coordinator: a stream of incoming
/// requests and a sink for responses/heartbeats.
pub struct SellerConnection {
    identity: SellerId,
    incoming: mpsc::UnboundedReceiver<Envelope>,
    outbox: mpsc::UnboundedSender<Bytes>,
}

impl SellerConnection {
    /// Dial the coordinator at `addr`, announce `identity`, and spawn the
    /// background task that drives the connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Send`] if the connection cannot be
    /// established or the handshake frame cannot be written.
    pub async fn connect(identity: SellerId, addr: std::net::SocketAddr) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::Send {
                peer: addr.to_string(),
                reason: e.to_string(),
            })?;
        let mut framed = Framed::new(stream, frame_codec());

        let hello = crate::codec::encode(&Frame::Hello {
            identity: identity.clone(),
        })
        .map_err(|e| TransportError::Send {
            peer: addr.to_string(),
            reason: e.to_string(),
        })?;
        framed
            .send(Bytes::from(hello))
            .await
            .map_err(|e| TransportError::Send {
                peer: addr.to_string(),
                reason: e.to_string(),
            })?;

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Bytes>();

        let task_identity = identity.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    incoming = framed.next() => {
                        match incoming {
                            Some(Ok(bytes)) => match crate::codec::decode(&bytes) {
                                Ok(Frame::Message(envelope)) => {
                                    if incoming_tx.send(envelope).is_err() {
                                        break;
                                    }
                                }
                                Ok(Frame::Hello { .. }) => {
                                    tracing::warn!(peer = %task_identity, "unexpected Hello from coordinator");
                                }
                                Err(error) => {
                                    tracing::warn!(peer = %task_identity, %error, "malformed frame discarded");
                                }
                            },
                            Some(Err(error)) => {
                                tracing::warn!(peer = %task_identity, %error, "frame decode error");
                            }
                            None => break,
                        }
                    }
                    outgoing = outbox_rx.recv() => {
                        match outgoing {
                            Some(bytes) => {
                                if let Err(error) = framed.send(bytes).await {
                                    tracing::warn!(peer = %task_identity, %error, "write failed");
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
            tracing::info!(peer = %task_identity, "connection to coordinator closed");
        });

        Ok(Self {
            identity,
            incoming: incoming_rx,
            outbox: outbox_tx,
        })
    }

    /// Await the next request or heartbeat envelope from the coordinator.
    /// Returns `None` once the connection has closed.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.incoming.recv().await
    }

    /// Send a response envelope back to the coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BrokerShutdown`] if the connection has
    /// already closed.
    pub fn respond(&self, response: Envelope) -> Result<(), TransportError> {
        let bytes = crate::codec::encode(&Frame::Message(response)).map_err(|e| TransportError::Send {
            peer: self.identity.to_string(),
            reason: e.to_string(),
        })?;
        self.outbox
            .send(Bytes::from(bytes))
            .map_err(|_| TransportError::BrokerShutdown)
    }

    /// Send a heartbeat frame. Heartbeats never populate a pending-request
    /// table on the coordinator side.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BrokerShutdown`] if the connection has
    /// already closed.
    pub fn send_heartbeat(&self) -> Result<(), TransportError> {
        let envelope = Envelope::request(
            MessageKind::Heartbeat,
            self.identity.clone(),
            None,
            Payload::Heartbeat,
            chrono::Utc::now(),
        );
        self.respond(envelope)
    }
}
