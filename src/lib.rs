//! # netframe
//!
//! Length-prefixed framing protocol core with an event-driven TCP connection
//! engine.
//!
//! Every message on the wire is one frame: a 4-byte length prefix followed by
//! exactly that many payload bytes, with the zero-length frame reserved as a
//! keep-alive. On top of that format sit a [`Connection`] driving a
//! continuous, strictly-ordered receive loop with typed notifications, and a
//! [`ProtocolServer`] that accepts many such connections and republishes
//! their lifecycle and data events at server scope.
//!
//! ## Components
//! - [`core`]: frame types, the length-prefix codec and the async operation core
//! - [`protocol`]: the stream driver with overlap guards and reset semantics
//! - [`transport`]: connections, the registry, the client factory and endpoint resolution
//! - [`service`]: the accept/republish/shutdown server
//! - [`config`]: TOML/env configuration with validation
//! - [`utils`]: logging setup
//!
//! ## Client example
//! ```no_run
//! use netframe::{Connection, ConnectionEvent};
//!
//! #[tokio::main]
//! async fn main() -> netframe::Result<()> {
//!     let conn = Connection::new("127.0.0.1", 9000)?;
//!     let mut events = conn.subscribe();
//!
//!     conn.connect().await?;
//!     conn.send(b"ping").await?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ConnectionEvent::Message(payload) => {
//!                 println!("received {} bytes", payload.len());
//!             }
//!             ConnectionEvent::Disconnected => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Server example
//! ```no_run
//! use std::sync::Arc;
//! use netframe::{FramedClientFactory, ProtocolServer, ServerEvent};
//!
//! #[tokio::main]
//! async fn main() -> netframe::Result<()> {
//!     let server = ProtocolServer::bind_port(9000)
//!         .with_client_factory(Arc::new(FramedClientFactory::new()));
//!     let mut events = server.subscribe();
//!
//!     server.start().await?;
//!     while let Some(event) = events.recv().await {
//!         if let ServerEvent::Message { client, payload } = event {
//!             client.send(&payload).await?; // echo
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::NetConfig;
pub use crate::core::codec::{FrameCodec, DEFAULT_MAX_MESSAGE_LENGTH};
pub use crate::core::frame::{ReadOutcome, WireFrame};
pub use crate::core::ops::{CompletionStatus, Operation};
pub use error::{NetError, Result};
pub use protocol::wire::{TcpWireProtocol, WireProtocol};
pub use service::server::{ProtocolServer, ServerEvent};
pub use transport::connection::{Connection, ConnectionEvent, ConnectionState};
pub use transport::factory::{ClientFactory, FramedClientFactory};
pub use transport::registry::ConnectionRegistry;
pub use transport::resolver::{DnsEndpointResolver, EndpointResolver, FixedResolver};
