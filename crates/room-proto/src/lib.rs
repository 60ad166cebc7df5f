//! Room protocol definitions
//!
//! This crate defines the identity type, the tunnel-connect request payloads,
//! and the framed stream envelope shared by every transport of the room.

pub mod codec;
pub mod identity;
pub mod message;

pub use codec::{CodecError, FrameCodec};
pub use identity::{Identity, IdentityError, Keypair};
pub use message::{
    ConnectRequest, ConnectRequestWithOrigin, Method, StreamFrame, WireError,
};

/// Protocol version, carried in the ALPN string.
pub const PROTOCOL_VERSION: u32 = 1;

/// ALPN identifier for room connections.
pub const ALPN: &[u8] = b"room/1";
