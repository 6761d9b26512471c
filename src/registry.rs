//! Registry of independently owned connections
//!
//! Every accepted transport gets its own [`Connection`] under a fresh
//! [`ConnectionId`], so one client's handshake or callback can never replace
//! another's.
//!
//! # Example
//!
//! ```ignore
//! use ws_upgrade::{Config, ConnectionRegistry};
//!
//! let mut registry = ConnectionRegistry::new(Config::default());
//!
//! let id = registry.accept(socket);
//! registry.on_message(id, move |payload| println!("{}: {:?}", id, payload));
//!
//! // when the socket delivers bytes
//! registry.on_data(id, &chunk)?;
//!
//! registry.send(id, "welcome")?;
//! ```

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::Config;
use crate::connection::{Connection, Phase, Transport};
use crate::error::{Error, Result};

/// Identity of a registered connection
///
/// Ids are allocated from a counter and never reused by the same registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Get the raw ID value
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connections keyed by identity
pub struct ConnectionRegistry<T: Transport> {
    config: Config,
    connections: HashMap<ConnectionId, Connection<T>>,
    next_id: u64,
}

impl<T: Transport> ConnectionRegistry<T> {
    /// Create an empty registry; every connection gets a copy of `config`
    pub fn new(config: Config) -> Self {
        Self {
            config,
            connections: HashMap::new(),
            next_id: 1,
        }
    }

    /// Register a freshly accepted transport
    pub fn accept(&mut self, transport: T) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        self.connections
            .insert(id, Connection::new(transport, self.config.clone()));
        debug!(connection = %id, "connection registered");
        id
    }

    /// Register the message callback for one connection
    ///
    /// Returns `false` if no such connection exists.
    pub fn on_message<F>(&mut self, id: ConnectionId, handler: F) -> bool
    where
        F: FnMut(Bytes) + Send + 'static,
    {
        match self.connections.get_mut(&id) {
            Some(conn) => {
                conn.on_message(handler);
                true
            }
            None => false,
        }
    }

    /// Feed bytes received on one connection's transport
    ///
    /// A connection that fails (bad handshake, bad frame) has already closed
    /// its transport and is removed from the registry.
    pub fn on_data(&mut self, id: ConnectionId, data: &[u8]) -> Result<()> {
        let conn = self
            .connections
            .get_mut(&id)
            .ok_or(Error::UnknownConnection(id.0))?;

        let result = conn.on_data(data);
        if result.is_err() || conn.phase() == Phase::Closed {
            self.connections.remove(&id);
            debug!(connection = %id, "connection removed after failure");
        }
        result
    }

    /// Send a text frame on one connection
    ///
    /// Sending to an unknown id is dropped with a warning, the same way a
    /// connection without a transport treats a send.
    pub fn send(&mut self, id: ConnectionId, payload: impl AsRef<[u8]>) -> Result<()> {
        match self.connections.get_mut(&id) {
            Some(conn) => conn.send(payload),
            None => {
                warn!(connection = %id, "send to unknown connection, message dropped");
                Ok(())
            }
        }
    }

    /// Close a connection's transport and forget it
    pub fn close(&mut self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some(mut conn) => {
                conn.close();
                debug!(connection = %id, "connection closed");
                true
            }
            None => false,
        }
    }

    /// Look up a connection
    pub fn get(&self, id: ConnectionId) -> Option<&Connection<T>> {
        self.connections.get(&id)
    }

    /// Phase of a connection, if registered
    pub fn phase(&self, id: ConnectionId) -> Option<Phase> {
        self.connections.get(&id).map(Connection::phase)
    }

    /// Ids of all registered connections, in allocation order
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl<T: Transport> fmt::Debug for ConnectionRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connections.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
