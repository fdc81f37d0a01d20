//! # Protocol Layer
//!
//! The stream driver binding the frame codec to an attached byte stream,
//! with overlap guards and reset semantics.

pub mod wire;

pub use wire::{TcpWireProtocol, WireProtocol};
