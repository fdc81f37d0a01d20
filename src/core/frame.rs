//! Frame and read-classification types for the length-prefixed wire format.

use bytes::Bytes;

/// Size of the length prefix preceding every frame, in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// The payload that denotes a keep-alive: the empty byte array.
/// Writing this payload produces a zero-length frame on the wire.
pub const KEEP_ALIVE_PAYLOAD: &[u8] = &[];

/// One decoded frame from the wire.
///
/// A zero-length frame is the reserved keep-alive and carries no payload;
/// everything else is an application message delivered verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// An application message with its payload bytes.
    Message(Bytes),
    /// The zero-length keep-alive frame.
    KeepAlive,
}

impl WireFrame {
    /// The payload carried by this frame. Empty for a keep-alive.
    pub fn payload(&self) -> &[u8] {
        match self {
            WireFrame::Message(payload) => payload,
            WireFrame::KeepAlive => KEEP_ALIVE_PAYLOAD,
        }
    }

    /// Whether this frame is the keep-alive.
    pub fn is_keep_alive(&self) -> bool {
        matches!(self, WireFrame::KeepAlive)
    }
}

/// Classification of one completed read against a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A full application message was read; payload returned verbatim.
    Message(Bytes),
    /// A zero-length keep-alive frame was read.
    KeepAlive,
    /// Zero bytes were available on the very first read: the peer closed
    /// the stream in an orderly fashion before any prefix byte arrived.
    EmptyRead,
}

impl ReadOutcome {
    /// Whether this outcome signals an orderly stream close.
    pub fn is_empty_read(&self) -> bool {
        matches!(self, ReadOutcome::EmptyRead)
    }
}
