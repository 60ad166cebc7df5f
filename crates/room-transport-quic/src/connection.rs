//! Authenticated QUIC connections.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use room_proto::{Identity, Method, StreamFrame};
use room_transport::{
    CallReply, DuplexStream, Endpoint, IncomingCall, TransportError, TransportResult,
};

use crate::cert;
use crate::stream::{QuicByteSink, QuicByteSource};

/// One QUIC connection whose peer identity was attested during the TLS
/// handshake. Both sides hold the same type; calls flow in either direction.
pub struct RoomConnection {
    connection: quinn::Connection,
    identity: Identity,
}

impl RoomConnection {
    pub(crate) fn new(connection: quinn::Connection) -> TransportResult<Self> {
        let identity = cert::extract_verified_identity(&connection).ok_or_else(|| {
            TransportError::Tls("peer presented no identity certificate".to_string())
        })?;

        Ok(Self {
            connection,
            identity,
        })
    }

    /// The peer's transport-attested identity.
    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Waits for the next inbound call on this connection.
    ///
    /// Returns `Ok(None)` once the connection closed on either side; other
    /// connection failures surface as errors.
    pub async fn next_call(&self) -> TransportResult<Option<IncomingCall>> {
        let (send, recv) = match self.connection.accept_bi().await {
            Ok(pair) => pair,
            Err(quinn::ConnectionError::ApplicationClosed(_))
            | Err(quinn::ConnectionError::LocallyClosed) => return Ok(None),
            Err(err) => return Err(TransportError::Connection(err.to_string())),
        };

        let mut source = QuicByteSource::new(recv);
        let sink = QuicByteSink::new(send);

        let (method, args) = source.read_request().await?;
        debug!(peer = %self.identity.short(), %method, "inbound call");

        Ok(Some(IncomingCall::new(
            method,
            args,
            Box::new(QuicCallReply { source, sink }),
        )))
    }

    /// A callable handle to this peer, suitable for the endpoint registry.
    /// The handle shares the underlying connection and stays cheap to clone.
    pub fn endpoint(&self) -> Arc<dyn Endpoint> {
        Arc::new(QuicEndpoint {
            connection: self.connection.clone(),
            identity: self.identity,
        })
    }

    pub fn close(&self, reason: &str) {
        self.connection.close(0u32.into(), reason.as_bytes());
    }

    /// Resolves once the connection is fully closed.
    pub async fn closed(&self) {
        let _ = self.connection.closed().await;
    }
}

struct QuicEndpoint {
    connection: quinn::Connection,
    identity: Identity,
}

#[async_trait]
impl Endpoint for QuicEndpoint {
    fn identity(&self) -> Identity {
        self.identity
    }

    async fn open_duplex(&self, method: Method, args: Vec<u8>) -> TransportResult<DuplexStream> {
        let (send, recv) = self
            .connection
            .open_bi()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let mut sink = QuicByteSink::new(send);
        let mut source = QuicByteSource::new(recv);

        debug!(peer = %self.identity.short(), %method, "opening call");
        sink.send_frame(&StreamFrame::Request { method, args }).await?;
        source.read_verdict().await?;

        Ok(DuplexStream::new(Box::new(source), Box::new(sink)))
    }
}

struct QuicCallReply {
    source: QuicByteSource,
    sink: QuicByteSink,
}

#[async_trait]
impl CallReply for QuicCallReply {
    async fn accept(self: Box<Self>) -> TransportResult<DuplexStream> {
        let mut this = *self;
        this.sink.send_frame(&StreamFrame::Accept).await?;
        Ok(DuplexStream::new(Box::new(this.source), Box::new(this.sink)))
    }

    async fn reject(self: Box<Self>, reason: &str) -> TransportResult<()> {
        let mut this = *self;
        this.sink
            .send_frame(&StreamFrame::Reject {
                reason: reason.to_string(),
            })
            .await?;
        this.sink.finish();
        Ok(())
    }
}
