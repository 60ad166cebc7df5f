//! QUIC transport configuration.

use std::sync::Arc;
use std::time::Duration;

use room_proto::Keypair;
use room_transport::{TransportError, TransportResult};

use crate::cert;

/// Tuning knobs for room QUIC endpoints.
///
/// The TLS side needs no configuration: certificates derive from the node
/// keypair handed to [`QuicConfig::build_server_config`] and
/// [`QuicConfig::build_client_config`].
#[derive(Debug, Clone)]
pub struct QuicConfig {
    /// Keep-alive ping interval. Keeps NAT bindings warm and detects dead
    /// peers without any traffic on the relay streams themselves.
    pub keep_alive_interval: Duration,
    /// Connection idle timeout. Must comfortably exceed the keep-alive
    /// interval or healthy connections get dropped.
    pub max_idle_timeout: Duration,
    /// Maximum concurrent bidirectional streams per connection.
    pub max_concurrent_streams: u32,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(3),
            max_idle_timeout: Duration::from_secs(30),
            max_concurrent_streams: 256,
        }
    }
}

impl QuicConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.max_idle_timeout = timeout;
        self
    }

    pub fn with_max_streams(mut self, max: u32) -> Self {
        self.max_concurrent_streams = max;
        self
    }

    pub fn validate(&self) -> TransportResult<()> {
        if self.keep_alive_interval.is_zero() {
            return Err(TransportError::Configuration(
                "keep-alive interval must be greater than zero".to_string(),
            ));
        }

        if self.max_idle_timeout < self.keep_alive_interval * 2 {
            return Err(TransportError::Configuration(format!(
                "idle timeout {:?} must be at least twice the keep-alive interval {:?}",
                self.max_idle_timeout, self.keep_alive_interval
            )));
        }

        Ok(())
    }

    pub(crate) fn build_server_config(&self, keypair: &Keypair) -> TransportResult<quinn::ServerConfig> {
        crate::ensure_crypto_provider();
        self.validate()?;

        let crypto = cert::server_crypto(keypair)?;
        let quic_crypto = quinn::crypto::rustls::QuicServerConfig::try_from(crypto)
            .map_err(|e| TransportError::Tls(format!("failed to create QUIC server config: {}", e)))?;

        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_crypto));
        server_config.migration(true);
        server_config.transport_config(Arc::new(self.transport_config()?));

        Ok(server_config)
    }

    pub(crate) fn build_client_config(&self, keypair: &Keypair) -> TransportResult<quinn::ClientConfig> {
        crate::ensure_crypto_provider();
        self.validate()?;

        let crypto = cert::client_crypto(keypair)?;
        let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| TransportError::Tls(format!("failed to create QUIC client config: {}", e)))?;

        let mut client_config = quinn::ClientConfig::new(Arc::new(quic_crypto));
        client_config.transport_config(Arc::new(self.transport_config()?));

        Ok(client_config)
    }

    fn transport_config(&self) -> TransportResult<quinn::TransportConfig> {
        let idle_timeout = self.max_idle_timeout.try_into().map_err(|_| {
            TransportError::Configuration(format!(
                "idle timeout {:?} is out of range",
                self.max_idle_timeout
            ))
        })?;

        let mut transport = quinn::TransportConfig::default();
        transport.keep_alive_interval(Some(self.keep_alive_interval));
        transport.max_idle_timeout(Some(idle_timeout));
        transport.max_concurrent_bidi_streams(self.max_concurrent_streams.into());

        Ok(transport)
    }
}
