//! The server's thread-safe set of currently active connections.
//!
//! A plain `Vec` behind one coarse lock: membership mirrors "registered for
//! event forwarding", not raw socket state, and the critical sections are
//! short and never span I/O.

use std::sync::Mutex;

use crate::transport::connection::Connection;

/// Thread-safe collection of live [`Connection`] handles.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<Vec<Connection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    pub fn add(&self, connection: Connection) {
        if let Ok(mut list) = self.connections.lock() {
            list.push(connection);
        }
    }

    /// Unregister a connection, matched by identity.
    pub fn remove(&self, connection: &Connection) {
        if let Ok(mut list) = self.connections.lock() {
            list.retain(|candidate| !candidate.same_connection(connection));
        }
    }

    /// Whether the connection is currently registered.
    pub fn contains(&self, connection: &Connection) -> bool {
        self.connections
            .lock()
            .map(|list| {
                list.iter()
                    .any(|candidate| candidate.same_connection(connection))
            })
            .unwrap_or(false)
    }

    /// A point-in-time copy of the registered connections.
    pub fn snapshot(&self) -> Vec<Connection> {
        self.connections
            .lock()
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /// Remove every registered connection.
    pub fn clear(&self) {
        if let Ok(mut list) = self.connections.lock() {
            list.clear();
        }
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.lock().map(|list| list.len()).unwrap_or(0)
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
