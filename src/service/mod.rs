//! # Service Layer
//!
//! The accept/republish/shutdown server orchestrating many framed
//! connections.

pub mod server;

pub use server::{ProtocolServer, ServerEvent};
