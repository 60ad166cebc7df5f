//! Transport abstraction for room connections.
//!
//! The relay core never touches a concrete transport. It consumes the traits
//! defined here: a half-duplex stream pair per call ([`ByteSource`] /
//! [`ByteSink`]), a callable handle to a connected peer ([`Endpoint`]), and
//! the accept/reject surface of an inbound call ([`IncomingCall`]).
//!
//! [`memory`] provides an in-process implementation used by tests and
//! same-process peers; the QUIC implementation lives in a sibling crate.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use room_proto::{Identity, Method};

pub mod memory;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("stream closed")]
    StreamClosed,

    #[error("call rejected: {0}")]
    Rejected(String),

    #[error("peer reported: {0}")]
    Remote(String),

    #[error("codec error: {0}")]
    Codec(#[from] room_proto::CodecError),

    #[error("wire error: {0}")]
    Wire(#[from] room_proto::WireError),

    #[error("no such method: {0}")]
    NoSuchMethod(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Readable half of a call stream.
#[async_trait]
pub trait ByteSource: Send {
    /// Waits for the next chunk. `Ok(None)` is clean EOF; an error carries
    /// the stream failure. Dropping the source releases the read half.
    async fn next_chunk(&mut self) -> TransportResult<Option<Bytes>>;
}

/// Writable half of a call stream.
///
/// Both close operations are idempotent: any close after the first succeeds
/// without effect, so teardown paths may race freely.
#[async_trait]
pub trait ByteSink: Send {
    async fn write_chunk(&mut self, chunk: Bytes) -> TransportResult<()>;

    /// Clean close: the peer's source observes EOF.
    async fn close(&mut self) -> TransportResult<()>;

    /// Abortive close: the peer's source observes an error with this reason.
    async fn close_with_error(&mut self, reason: &str) -> TransportResult<()>;
}

/// An owned stream pair bound to one duplex call.
pub struct DuplexStream {
    pub source: Box<dyn ByteSource>,
    pub sink: Box<dyn ByteSink>,
}

impl DuplexStream {
    pub fn new(source: Box<dyn ByteSource>, sink: Box<dyn ByteSink>) -> Self {
        Self { source, sink }
    }

    pub fn split(self) -> (Box<dyn ByteSource>, Box<dyn ByteSink>) {
        (self.source, self.sink)
    }
}

impl std::fmt::Debug for DuplexStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexStream").finish_non_exhaustive()
    }
}

/// A live, callable connection to a peer.
///
/// Held by the endpoint registry; the relay core only ever calls
/// [`open_duplex`](Endpoint::open_duplex) on it.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Identity of the peer this endpoint reaches.
    fn identity(&self) -> Identity;

    /// Opens a new duplex call on the peer's existing connection.
    ///
    /// Resolves once the peer has answered the call's verdict: a rejection
    /// surfaces as [`TransportError::Rejected`], transport failures as their
    /// own variants. On success the returned pair is live for relaying.
    async fn open_duplex(&self, method: Method, args: Vec<u8>) -> TransportResult<DuplexStream>;
}

/// The answer surface of one inbound call. Exactly one of `accept` or
/// `reject` is consumed per call.
#[async_trait]
pub trait CallReply: Send {
    /// Accepts the call, yielding its stream pair.
    async fn accept(self: Box<Self>) -> TransportResult<DuplexStream>;

    /// Rejects the call; the opener's call fails with this reason.
    async fn reject(self: Box<Self>, reason: &str) -> TransportResult<()>;
}

/// An inbound call as delivered by a transport: the decoded method, the raw
/// argument bytes, and the pending reply.
pub struct IncomingCall {
    pub method: Method,
    pub args: Vec<u8>,
    reply: Box<dyn CallReply>,
}

impl IncomingCall {
    pub fn new(method: Method, args: Vec<u8>, reply: Box<dyn CallReply>) -> Self {
        Self { method, args, reply }
    }

    pub async fn accept(self) -> TransportResult<DuplexStream> {
        self.reply.accept().await
    }

    pub async fn reject(self, reason: &str) -> TransportResult<()> {
        self.reply.reject(reason).await
    }
}

impl std::fmt::Debug for IncomingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingCall")
            .field("method", &self.method)
            .field("args_len", &self.args.len())
            .finish_non_exhaustive()
    }
}
