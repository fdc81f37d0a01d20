//! # Transport Layer
//!
//! Point-to-point framed connections and their supporting pieces.
//!
//! ## Components
//! - **Connection**: One framed TCP connection with a continuous receive loop
//! - **Registry**: The server's thread-safe set of active connections
//! - **Factory**: Pluggable wrapping of accepted sockets into connections
//! - **Resolver**: Hostname/IP to socket-address resolution

pub mod connection;
pub mod factory;
pub mod registry;
pub mod resolver;

pub use connection::{Connection, ConnectionEvent, ConnectionState};
pub use factory::{ClientFactory, FramedClientFactory};
pub use registry::ConnectionRegistry;
pub use resolver::{DnsEndpointResolver, EndpointResolver, FixedResolver};
