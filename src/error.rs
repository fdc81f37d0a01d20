//! # Error Types
//!
//! Error handling for the framing protocol and connection engine.
//!
//! This module defines all error variants that can occur during protocol
//! operations, from low-level I/O failures to protocol violations on the wire.
//!
//! ## Error Categories
//! - **I/O Errors**: Socket and stream failures
//! - **Protocol Errors**: Over-size or negative frame lengths
//! - **State Errors**: Operations attempted against an unconnected or busy instance
//! - **Async Errors**: Captured failures re-raised from background operations
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use netframe::error::{NetError, Result};
//!
//! fn require_host(host: &str) -> Result<&str> {
//!     if host.trim().is_empty() {
//!         return Err(NetError::InvalidArgument("empty hostname provided".to_string()));
//!     }
//!     Ok(host)
//! }
//!
//! assert!(require_host("  ").is_err());
//! assert!(require_host("example.com").is_ok());
//! ```

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Connection state errors
    pub const ERR_NOT_CONNECTED: &str = "No stream to operate on has been attached";

    /// Server configuration errors
    pub const ERR_NO_FACTORY: &str = "No client factory specified. Set one before calling start";
    pub const ERR_ALREADY_STARTED: &str = "Server has already been started";

    /// Synchronization errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
}

/// NetError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{}", constants::ERR_NOT_CONNECTED)]
    NotConnected,

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("A {0} operation is already in progress on this protocol instance")]
    OperationInProgress(&'static str),

    #[error("Attempt to end async operation '{actual}' against a handle for '{expected}'")]
    AsyncIdentityMismatch { expected: String, actual: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Async operation '{operation}' failed: {source}")]
    OperationFailed {
        operation: String,
        source: Arc<NetError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Type alias for Results using NetError
pub type Result<T> = std::result::Result<T, NetError>;

impl NetError {
    /// Wrap this error for fan-out to multiple event subscribers.
    pub fn shared(self) -> Arc<NetError> {
        Arc::new(self)
    }
}
