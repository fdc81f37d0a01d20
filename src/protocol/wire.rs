//! # Wire Protocol Driver
//!
//! [`WireProtocol`] frames and deframes one attached byte stream using the
//! length-prefix [`FrameCodec`]. It owns the split read/write halves of the
//! stream and enforces the overlap rule: at most one outstanding read and one
//! outstanding write per instance. Reads and writes use independent halves
//! and may proceed concurrently with each other.
//!
//! The instance is generic over the stream halves so tests can drive it over
//! in-memory duplex pipes; [`TcpWireProtocol`] is the alias used by the
//! connection engine.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::trace;

use crate::core::codec::{FrameCodec, DEFAULT_MAX_MESSAGE_LENGTH};
use crate::core::frame::{ReadOutcome, WireFrame, KEEP_ALIVE_PAYLOAD};
use crate::error::constants::ERR_LOCK_POISONED;
use crate::error::{NetError, Result};

/// The wire protocol driver over the owned halves of a [`tokio::net::TcpStream`].
pub type TcpWireProtocol = WireProtocol<OwnedReadHalf, OwnedWriteHalf>;

/// Drives the length-prefix framing over one attached stream.
///
/// Created detached; [`WireProtocol::attach`] binds a stream and
/// [`WireProtocol::reset`] detaches it again, clearing all in-flight buffers
/// so the instance is inert afterwards. Reading or writing while detached
/// fails with [`NetError::NotConnected`].
pub struct WireProtocol<R, W> {
    reader: Mutex<Option<FramedRead<R, FrameCodec>>>,
    writer: Mutex<Option<FramedWrite<W, FrameCodec>>>,
    read_busy: AtomicBool,
    write_busy: AtomicBool,
    attached: AtomicBool,
    // Bumped by reset() so an operation that was in flight across a reset
    // never puts its half back into a freshly detached instance.
    generation: AtomicU64,
    max_message_length: usize,
}

impl<R, W> WireProtocol<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Create a detached protocol instance with the default maximum message
    /// length of 256KB.
    pub fn new() -> Self {
        Self::with_max_message_length(DEFAULT_MAX_MESSAGE_LENGTH)
    }

    /// Create a detached protocol instance with a custom maximum message length.
    pub fn with_max_message_length(max_message_length: usize) -> Self {
        Self {
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            read_busy: AtomicBool::new(false),
            write_busy: AtomicBool::new(false),
            attached: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            max_message_length,
        }
    }

    /// The maximum message length this instance will accept or produce.
    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    /// The payload that denotes a keep-alive when passed to [`write`](Self::write).
    pub fn keep_alive_payload(&self) -> &'static [u8] {
        KEEP_ALIVE_PAYLOAD
    }

    /// Whether a stream is currently attached.
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Bind the split halves of a stream to this instance.
    pub fn attach(&self, reader: R, writer: W) -> Result<()> {
        let codec = FrameCodec::new(self.max_message_length);
        {
            let mut slot = lock(&self.reader)?;
            *slot = Some(FramedRead::new(reader, codec.clone()));
        }
        {
            let mut slot = lock(&self.writer)?;
            *slot = Some(FramedWrite::new(writer, codec));
        }
        self.attached.store(true, Ordering::Release);
        Ok(())
    }

    /// Detach the stream and clear all in-flight buffers.
    ///
    /// Safe to call while a read or write is pending: the pending operation
    /// completes against the detached halves and its outcome is discarded by
    /// the caller re-checking liveness.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.attached.store(false, Ordering::Release);
        if let Ok(mut slot) = self.reader.lock() {
            *slot = None;
        }
        if let Ok(mut slot) = self.writer.lock() {
            *slot = None;
        }
    }

    /// Read one frame, accumulating across partial stream reads, and
    /// classify the outcome.
    ///
    /// Returns [`ReadOutcome::EmptyRead`] when the peer closed the stream
    /// before any prefix byte arrived, [`ReadOutcome::KeepAlive`] for a
    /// zero-length frame, and [`ReadOutcome::Message`] with the payload
    /// bytes verbatim otherwise. Starting a read while one is pending fails
    /// with [`NetError::OperationInProgress`].
    pub async fn read(&self) -> Result<ReadOutcome> {
        let _busy = OpGuard::acquire(&self.read_busy, "read")?;
        let generation = self.generation.load(Ordering::Acquire);

        let mut framed = {
            let mut slot = lock(&self.reader)?;
            slot.take().ok_or(NetError::NotConnected)?
        };

        let outcome = match framed.next().await {
            Some(Ok(WireFrame::Message(payload))) => {
                trace!(bytes = payload.len(), "message frame read");
                Ok(ReadOutcome::Message(payload))
            }
            Some(Ok(WireFrame::KeepAlive)) => Ok(ReadOutcome::KeepAlive),
            Some(Err(err)) => Err(err),
            None => Ok(ReadOutcome::EmptyRead),
        };

        self.restore_reader(framed, generation);
        outcome
    }

    /// Frame `payload` and write it to the stream.
    ///
    /// The length prefix is always written; the payload only if non-empty,
    /// so writing an empty slice sends a keep-alive. Starting a write while
    /// one is pending fails with [`NetError::OperationInProgress`].
    pub async fn write(&self, payload: &[u8]) -> Result<()> {
        let _busy = OpGuard::acquire(&self.write_busy, "write")?;
        let generation = self.generation.load(Ordering::Acquire);

        let mut framed = {
            let mut slot = lock(&self.writer)?;
            slot.take().ok_or(NetError::NotConnected)?
        };

        let result = framed.send(Bytes::copy_from_slice(payload)).await;

        self.restore_writer(framed, generation);
        result
    }

    /// Send the zero-length keep-alive frame.
    pub async fn send_keep_alive(&self) -> Result<()> {
        self.write(KEEP_ALIVE_PAYLOAD).await
    }

    /// Flush and shut down the write direction of the attached stream.
    ///
    /// Takes the writer half permanently; later writes fail with
    /// [`NetError::NotConnected`]. A write still in flight cannot be flushed
    /// on its behalf: that is reported as [`NetError::OperationInProgress`]
    /// and the stream is torn down abruptly once the write completes.
    pub async fn shutdown(&self) -> Result<()> {
        let framed = {
            let mut slot = lock(&self.writer)?;
            slot.take()
        };

        match framed {
            Some(mut framed) => {
                trace!("write half shut down");
                framed.close().await
            }
            None if self.is_attached() => Err(NetError::OperationInProgress("write")),
            None => Ok(()),
        }
    }

    fn restore_reader(&self, framed: FramedRead<R, FrameCodec>, generation: u64) {
        if self.generation.load(Ordering::Acquire) != generation {
            return; // reset in the meantime; drop the stale half
        }
        if let Ok(mut slot) = self.reader.lock() {
            if slot.is_none() {
                *slot = Some(framed);
            }
        }
    }

    fn restore_writer(&self, framed: FramedWrite<W, FrameCodec>, generation: u64) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        if let Ok(mut slot) = self.writer.lock() {
            if slot.is_none() {
                *slot = Some(framed);
            }
        }
    }
}

impl<R, W> Default for WireProtocol<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| NetError::Internal(ERR_LOCK_POISONED.to_string()))
}

/// Compare-and-swap guard enforcing one outstanding operation per direction.
struct OpGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> OpGuard<'a> {
    fn acquire(flag: &'a AtomicBool, direction: &'static str) -> Result<Self> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(NetError::OperationInProgress(direction));
        }
        Ok(Self { flag })
    }
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
