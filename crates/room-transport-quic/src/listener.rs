//! QUIC endpoints for accepting and dialing room connections.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tracing::{debug, warn};

use room_proto::{Identity, Keypair};
use room_transport::{TransportError, TransportResult};

use crate::cert;
use crate::config::QuicConfig;
use crate::connection::RoomConnection;
use crate::ensure_crypto_provider;

/// Listening endpoint that only admits peers with a valid identity
/// certificate.
pub struct RoomListener {
    endpoint: quinn::Endpoint,
    identity: Identity,
}

impl RoomListener {
    pub fn bind(addr: SocketAddr, keypair: &Keypair, config: &QuicConfig) -> TransportResult<Self> {
        ensure_crypto_provider();

        let server_config = config.build_server_config(keypair)?;
        let endpoint = quinn::Endpoint::server(server_config, addr)
            .map_err(|e| TransportError::Connection(format!("failed to bind {}: {}", addr, e)))?;

        Ok(Self {
            endpoint,
            identity: keypair.identity(),
        })
    }

    /// Our own identity, as peers will see it.
    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.endpoint
            .local_addr()
            .map_err(|e| TransportError::Connection(e.to_string()))
    }

    /// Accepts the next authenticated connection.
    ///
    /// Handshake failures are logged and skipped so one bad dialer cannot
    /// stall the accept loop. Returns `None` once the endpoint is closed.
    pub async fn accept(&self) -> Option<RoomConnection> {
        loop {
            let incoming = self.endpoint.accept().await?;
            let remote = incoming.remote_address();

            let connection = match incoming.await {
                Ok(connection) => connection,
                Err(err) => {
                    debug!(%remote, error = %err, "handshake failed");
                    continue;
                }
            };

            match RoomConnection::new(connection) {
                Ok(conn) => {
                    debug!(peer = %conn.identity().short(), %remote, "connection admitted");
                    return Some(conn);
                }
                Err(err) => {
                    warn!(%remote, error = %err, "rejecting unidentified connection");
                    continue;
                }
            }
        }
    }

    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"room shutting down");
    }
}

/// Dialing endpoint. One connector serves any number of rooms; the expected
/// room identity is pinned per dial.
pub struct RoomConnector {
    endpoint: quinn::Endpoint,
}

impl RoomConnector {
    pub fn new(keypair: &Keypair, config: &QuicConfig) -> TransportResult<Self> {
        ensure_crypto_provider();

        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        let mut endpoint = quinn::Endpoint::client(bind_addr)
            .map_err(|e| TransportError::Connection(format!("failed to bind client socket: {}", e)))?;
        endpoint.set_default_client_config(config.build_client_config(keypair)?);

        Ok(Self { endpoint })
    }

    /// Dials `addr` and verifies the server proves ownership of `room`.
    pub async fn connect(&self, addr: SocketAddr, room: Identity) -> TransportResult<RoomConnection> {
        let server_name = cert::identity_server_name(&room);

        let connecting = self
            .endpoint
            .connect(addr, &server_name)
            .map_err(|e| TransportError::Configuration(e.to_string()))?;
        let connection = connecting
            .await
            .map_err(|e| TransportError::Connection(format!("failed to reach {}: {}", addr, e)))?;

        RoomConnection::new(connection)
    }

    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"");
    }
}
