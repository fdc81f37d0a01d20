//! # Core Protocol Components
//!
//! Wire format types, the frame codec, and the async operation core.
//!
//! ## Components
//! - **Frame**: Typed wire units and read classification
//! - **Codec**: Tokio codec for the length-prefix framing over byte streams
//! - **Ops**: Waitable handles for named background work
//!
//! ## Wire Format
//! ```text
//! [Length(4, native byte order)] [Payload(N)]
//! ```
//! A length of zero denotes the keep-alive frame; no payload bytes follow it.
//!
//! ## Safety
//! - Maximum message size: 256KB by default (prevents memory exhaustion)
//! - Length validation before any payload allocation

pub mod codec;
pub mod frame;
pub mod ops;

pub use codec::{FrameCodec, DEFAULT_MAX_MESSAGE_LENGTH};
pub use frame::{ReadOutcome, WireFrame, KEEP_ALIVE_PAYLOAD, LENGTH_PREFIX_SIZE};
pub use ops::{CompletionStatus, Operation};
