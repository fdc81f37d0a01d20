//! The connected-client factory seam.
//!
//! The server never builds connections itself: a pluggable factory wraps each
//! raw accepted socket, so deployments can choose protocol variants or add
//! instrumentation without changing the accept loop.

use tokio::net::TcpStream;

use crate::core::codec::DEFAULT_MAX_MESSAGE_LENGTH;
use crate::error::Result;
use crate::transport::connection::Connection;

/// Wraps a raw accepted socket into a [`Connection`].
pub trait ClientFactory: Send + Sync {
    /// Produce an inert connection around `stream`. The caller subscribes to
    /// its events and then calls [`Connection::initialize`].
    fn wrap(&self, stream: TcpStream) -> Result<Connection>;
}

/// Default factory producing connections that speak the length-prefix
/// framing with a configurable maximum message length.
#[derive(Debug, Clone)]
pub struct FramedClientFactory {
    max_message_length: usize,
}

impl FramedClientFactory {
    /// Factory with the default 256KB message limit.
    pub fn new() -> Self {
        Self::with_max_message_length(DEFAULT_MAX_MESSAGE_LENGTH)
    }

    /// Factory with a custom message limit, applied to every connection it
    /// produces.
    pub fn with_max_message_length(max_message_length: usize) -> Self {
        Self { max_message_length }
    }

    /// The message limit applied to produced connections.
    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }
}

impl Default for FramedClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientFactory for FramedClientFactory {
    fn wrap(&self, stream: TcpStream) -> Result<Connection> {
        Connection::from_accepted_with_max_length(stream, self.max_message_length)
    }
}
