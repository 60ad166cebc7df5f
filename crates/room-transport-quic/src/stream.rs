//! Framed byte streams over QUIC bidirectional streams.
//!
//! Each call runs on one bidirectional stream carrying length-prefixed
//! [`StreamFrame`]s. The opener sends `Request`, the acceptor answers with a
//! verdict, and after an accept both directions carry `Data` chunks until a
//! `Close` or `Error` frame ends them.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use room_proto::{FrameCodec, Method, StreamFrame};
use room_transport::{ByteSink, ByteSource, TransportError, TransportResult};

/// Read size per receive call. Frames are smaller than this in practice, so
/// one read usually completes at least one frame.
const READ_CHUNK: usize = 64 * 1024;

/// Reading half of a call stream.
pub struct QuicByteSource {
    recv: quinn::RecvStream,
    buf: BytesMut,
    done: bool,
}

impl QuicByteSource {
    pub(crate) fn new(recv: quinn::RecvStream) -> Self {
        Self {
            recv,
            buf: BytesMut::new(),
            done: false,
        }
    }

    /// Reads the next complete frame, or `None` on a bare FIN.
    async fn next_frame(&mut self) -> TransportResult<Option<StreamFrame>> {
        loop {
            if let Some(frame) = FrameCodec::decode(&mut self.buf)? {
                return Ok(Some(frame));
            }

            match self.recv.read_chunk(READ_CHUNK, true).await {
                Ok(Some(chunk)) => self.buf.extend_from_slice(&chunk.bytes),
                Ok(None) => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    return Err(TransportError::Connection(
                        "stream ended mid-frame".to_string(),
                    ));
                }
                Err(err) => return Err(TransportError::Connection(err.to_string())),
            }
        }
    }

    /// Reads the opening `Request` frame of an inbound stream.
    pub(crate) async fn read_request(&mut self) -> TransportResult<(Method, Vec<u8>)> {
        match self.next_frame().await? {
            Some(StreamFrame::Request { method, args }) => Ok((method, args)),
            Some(frame) => Err(TransportError::Connection(format!(
                "expected request frame, got {:?}",
                frame
            ))),
            None => Err(TransportError::StreamClosed),
        }
    }

    /// Awaits the acceptor's verdict after sending a `Request`.
    pub(crate) async fn read_verdict(&mut self) -> TransportResult<()> {
        match self.next_frame().await? {
            Some(StreamFrame::Accept) => Ok(()),
            Some(StreamFrame::Reject { reason }) => Err(TransportError::Rejected(reason)),
            Some(frame) => Err(TransportError::Connection(format!(
                "expected verdict frame, got {:?}",
                frame
            ))),
            None => Err(TransportError::StreamClosed),
        }
    }
}

#[async_trait]
impl ByteSource for QuicByteSource {
    async fn next_chunk(&mut self) -> TransportResult<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }

        match self.next_frame().await {
            Ok(Some(StreamFrame::Data(data))) => Ok(Some(Bytes::from(data))),
            // A bare FIN counts as a clean close; peers that vanish
            // mid-stream surface as connection errors instead.
            Ok(Some(StreamFrame::Close)) | Ok(None) => {
                self.done = true;
                Ok(None)
            }
            Ok(Some(StreamFrame::Error { reason })) => {
                self.done = true;
                Err(TransportError::Remote(reason))
            }
            Ok(Some(frame)) => {
                self.done = true;
                Err(TransportError::Connection(format!(
                    "unexpected frame on relay stream: {:?}",
                    frame
                )))
            }
            Err(err) => {
                self.done = true;
                Err(err)
            }
        }
    }
}

/// Writing half of a call stream.
pub struct QuicByteSink {
    send: quinn::SendStream,
    closed: bool,
}

impl QuicByteSink {
    pub(crate) fn new(send: quinn::SendStream) -> Self {
        Self { send, closed: false }
    }

    pub(crate) async fn send_frame(&mut self, frame: &StreamFrame) -> TransportResult<()> {
        let encoded = FrameCodec::encode(frame)?;
        self.send
            .write_all(&encoded)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }

    pub(crate) fn finish(&mut self) {
        self.closed = true;
        let _ = self.send.finish();
    }
}

#[async_trait]
impl ByteSink for QuicByteSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::StreamClosed);
        }
        self.send_frame(&StreamFrame::Data(chunk.to_vec())).await
    }

    async fn close(&mut self) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        // The peer may already be gone; closing stays best-effort.
        let _ = self.send_frame(&StreamFrame::Close).await;
        self.finish();
        Ok(())
    }

    async fn close_with_error(&mut self, reason: &str) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        let _ = self
            .send_frame(&StreamFrame::Error {
                reason: reason.to_string(),
            })
            .await;
        self.finish();
        Ok(())
    }
}
