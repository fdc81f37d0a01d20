//! Tokio codec for the length-prefixed wire format.
//!
//! Every frame on the wire is a 4-byte unsigned length prefix in native byte
//! order followed by exactly that many payload bytes. A length of zero is the
//! reserved keep-alive frame and no payload bytes follow it. The format
//! carries no versioning, no checksum, no compression and no multiplexing
//! field; it must stay byte-compatible with existing peers.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::frame::{WireFrame, LENGTH_PREFIX_SIZE};
use crate::error::{NetError, Result};

/// The default maximum message size to allow. Set to 256KB.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 256 * 1024;

/// Codec framing payload bytes with a 4-byte length prefix.
///
/// A received prefix that exceeds the configured maximum, or that would be
/// negative reinterpreted as a 32-bit signed integer, is rejected before any
/// payload buffer is allocated. The violation is fatal to the one stream the
/// codec is driving, never to the process.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_message_length: usize,
}

impl FrameCodec {
    /// Create a codec with the given maximum message length.
    pub fn new(max_message_length: usize) -> Self {
        Self { max_message_length }
    }

    /// The maximum message length this codec will accept or produce.
    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    fn validate_length(&self, declared: u32) -> Result<()> {
        // The legacy format writes the prefix as a signed 32-bit integer.
        if declared > i32::MAX as u32 {
            return Err(NetError::ProtocolViolation(format!(
                "received a negative message length of: {}",
                declared as i32
            )));
        }
        if declared as usize > self.max_message_length {
            return Err(NetError::ProtocolViolation(format!(
                "received a message larger than the maximum permitted size: {declared} bytes (limit: {})",
                self.max_message_length
            )));
        }
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_LENGTH)
    }
}

impl Decoder for FrameCodec {
    type Item = WireFrame;
    type Error = NetError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<WireFrame>> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        // The prefix is in native byte order for compatibility with the
        // original wire format.
        let declared = u32::from_ne_bytes(prefix);

        // Validate before reserving space for the payload.
        self.validate_length(declared)?;

        let length = declared as usize;
        if length == 0 {
            src.advance(LENGTH_PREFIX_SIZE);
            return Ok(Some(WireFrame::KeepAlive));
        }

        if src.len() < LENGTH_PREFIX_SIZE + length {
            // Partial frame; accumulate across stream reads.
            src.reserve(LENGTH_PREFIX_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let payload = src.split_to(length).freeze();
        Ok(Some(WireFrame::Message(payload)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<WireFrame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(NetError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("stream closed mid-frame with {} buffered bytes", src.len()),
            ))),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = NetError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        if payload.len() > self.max_message_length {
            return Err(NetError::ProtocolViolation(format!(
                "refusing to write a message of {} bytes, larger than the permitted maximum of {}",
                payload.len(),
                self.max_message_length
            )));
        }

        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.extend_from_slice(&(payload.len() as u32).to_ne_bytes());
        // The length prefix is always written; for a zero-length payload that
        // is the whole frame. This is exactly how a keep-alive is sent.
        if !payload.is_empty() {
            dst.extend_from_slice(&payload);
        }
        Ok(())
    }
}
