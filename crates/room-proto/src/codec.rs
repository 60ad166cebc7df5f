//! Length-prefixed frame codec for call streams.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::message::StreamFrame;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
}

/// Stream frame codec.
///
/// Wire format: `[length: u32 BE][payload: bincode-serialized frame]`.
pub struct FrameCodec;

impl FrameCodec {
    /// Maximum frame size (1 MiB). Relay chunks are re-framed per transport
    /// read, so frames never grow past a single receive buffer.
    pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

    pub fn encode(frame: &StreamFrame) -> Result<Bytes, CodecError> {
        let payload = bincode::serialize(frame)?;

        if payload.len() > Self::MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(payload.len()));
        }

        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&payload);

        Ok(buf.freeze())
    }

    /// Decodes one frame from the buffer.
    ///
    /// Returns `Ok(Some(frame))` when a complete frame was consumed,
    /// `Ok(None)` when more data is needed.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<StreamFrame>, CodecError> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&buf[..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > Self::MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(length));
        }

        if buf.len() < 4 + length {
            return Ok(None);
        }

        let _ = buf.split_to(4);
        let frame_bytes = buf.split_to(length);

        let frame: StreamFrame = bincode::deserialize(&frame_bytes)?;
        Ok(Some(frame))
    }
}
