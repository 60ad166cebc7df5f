//! In-process transport over bounded channels.
//!
//! Used by the tunnel tests and for peers living in the same process. The
//! channel capacity bounds in-flight chunks per direction, so moving data
//! through a memory stream exhibits the same backpressure as a network
//! transport.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use room_proto::{Identity, Method};

use crate::{
    ByteSink, ByteSource, CallReply, DuplexStream, Endpoint, TransportError, TransportResult,
};

/// Default per-direction chunk capacity.
pub const DEFAULT_CAPACITY: usize = 32;

#[derive(Debug)]
enum Item {
    Data(Bytes),
    Close,
    Error(String),
}

/// Creates a connected pair of duplex streams.
///
/// Whatever is written to one side's sink is read from the other side's
/// source, with at most `capacity` chunks in flight per direction.
pub fn duplex_pair(capacity: usize) -> (DuplexStream, DuplexStream) {
    let (left_tx, right_rx) = mpsc::channel(capacity);
    let (right_tx, left_rx) = mpsc::channel(capacity);

    let left = DuplexStream::new(
        Box::new(MemorySource::new(left_rx)),
        Box::new(MemorySink::new(left_tx)),
    );
    let right = DuplexStream::new(
        Box::new(MemorySource::new(right_rx)),
        Box::new(MemorySink::new(right_tx)),
    );
    (left, right)
}

/// Readable half of a memory stream.
pub struct MemorySource {
    rx: mpsc::Receiver<Item>,
    done: bool,
}

impl MemorySource {
    fn new(rx: mpsc::Receiver<Item>) -> Self {
        Self { rx, done: false }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn next_chunk(&mut self) -> TransportResult<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Item::Data(chunk)) => Ok(Some(chunk)),
            // A dropped sink reads as EOF, same as an explicit close.
            Some(Item::Close) | None => {
                self.done = true;
                Ok(None)
            }
            Some(Item::Error(reason)) => {
                self.done = true;
                Err(TransportError::Remote(reason))
            }
        }
    }
}

/// Writable half of a memory stream.
pub struct MemorySink {
    tx: mpsc::Sender<Item>,
    closed: bool,
}

impl MemorySink {
    fn new(tx: mpsc::Sender<Item>) -> Self {
        Self { tx, closed: false }
    }
}

#[async_trait]
impl ByteSink for MemorySink {
    async fn write_chunk(&mut self, chunk: Bytes) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::StreamClosed);
        }
        self.tx
            .send(Item::Data(chunk))
            .await
            .map_err(|_| TransportError::StreamClosed)
    }

    async fn close(&mut self) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // The peer having gone away already is not a close failure.
        let _ = self.tx.send(Item::Close).await;
        Ok(())
    }

    async fn close_with_error(&mut self, reason: &str) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _ = self.tx.send(Item::Error(reason.to_string())).await;
        Ok(())
    }
}

type CallHandler = dyn Fn(Method, Vec<u8>, DuplexStream) + Send + Sync;

/// An [`Endpoint`] whose calls are answered in-process.
///
/// Each `open_duplex` builds a fresh stream pair and hands the callee side to
/// the configured handler; the caller side is returned established.
pub struct MemoryEndpoint {
    identity: Identity,
    capacity: usize,
    on_call: Arc<CallHandler>,
}

impl MemoryEndpoint {
    pub fn new<F>(identity: Identity, on_call: F) -> Self
    where
        F: Fn(Method, Vec<u8>, DuplexStream) + Send + Sync + 'static,
    {
        Self {
            identity,
            capacity: DEFAULT_CAPACITY,
            on_call: Arc::new(on_call),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// An endpoint that accepts every call and echoes its input back until
    /// EOF, then closes.
    pub fn echo(identity: Identity) -> Self {
        Self::new(identity, |_method, _args, stream| {
            tokio::spawn(async move {
                let DuplexStream { mut source, mut sink } = stream;
                loop {
                    match source.next_chunk().await {
                        Ok(Some(chunk)) => {
                            if sink.write_chunk(chunk).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            let _ = sink.close().await;
                            break;
                        }
                        Err(_) => break,
                    }
                }
            });
        })
    }
}

#[async_trait]
impl Endpoint for MemoryEndpoint {
    fn identity(&self) -> Identity {
        self.identity
    }

    async fn open_duplex(&self, method: Method, args: Vec<u8>) -> TransportResult<DuplexStream> {
        let (caller_side, callee_side) = duplex_pair(self.capacity);
        (self.on_call)(method, args, callee_side);
        Ok(caller_side)
    }
}

/// The verdict an inbound call received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallVerdict {
    Accepted,
    Rejected(String),
}

/// [`CallReply`] over a memory stream pair.
pub struct MemoryCallReply {
    stream: DuplexStream,
    verdict: Option<oneshot::Sender<CallVerdict>>,
}

impl MemoryCallReply {
    pub fn new(stream: DuplexStream) -> Self {
        Self { stream, verdict: None }
    }

    /// Like [`new`](Self::new), but the verdict is also reported on a
    /// channel, so tests can observe which path was taken.
    pub fn watched(stream: DuplexStream) -> (Self, oneshot::Receiver<CallVerdict>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                stream,
                verdict: Some(tx),
            },
            rx,
        )
    }
}

#[async_trait]
impl CallReply for MemoryCallReply {
    async fn accept(self: Box<Self>) -> TransportResult<DuplexStream> {
        let mut this = *self;
        if let Some(tx) = this.verdict.take() {
            let _ = tx.send(CallVerdict::Accepted);
        }
        Ok(this.stream)
    }

    async fn reject(self: Box<Self>, reason: &str) -> TransportResult<()> {
        let mut this = *self;
        if let Some(tx) = this.verdict.take() {
            let _ = tx.send(CallVerdict::Rejected(reason.to_string()));
        }
        this.stream.sink.close_with_error(reason).await
    }
}
