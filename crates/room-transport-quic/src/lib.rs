//! QUIC transport for room nodes.
//!
//! Implements the transport traits from `room-transport` on top of quinn,
//! with mutual TLS bound to Ed25519 node identities. A connection attests
//! its peer's identity during the handshake; every call afterwards runs on
//! its own bidirectional stream framed by `room-proto`'s codec.

use std::sync::Once;

use tracing::debug;

pub mod cert;
pub mod config;
pub mod connection;
pub mod listener;
pub mod stream;

pub use cert::extract_verified_identity;
pub use config::QuicConfig;
pub use connection::RoomConnection;
pub use listener::{RoomConnector, RoomListener};
pub use stream::{QuicByteSink, QuicByteSource};

static CRYPTO_PROVIDER_INIT: Once = Once::new();

/// Installs the ring crypto provider as the rustls process default.
///
/// Called implicitly when binding or dialing; exposed so binaries can run it
/// once up front. Safe to call from multiple entry points; only the first
/// call does work.
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("crypto provider already installed");
        }
    });
}
