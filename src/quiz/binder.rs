//! Maps transient connection ids to durable participant identities.
//!
//! Connection ids are assigned per WebSocket and die with it; student and
//! host ids survive reconnects. This is the only place in the crate where
//! the two meet: everything behind it is keyed by durable identity.

use std::collections::HashMap;

use tokio::sync::RwLock;

/// Transient identifier of one live WebSocket connection
pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Host,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub durable_id: String,
    pub room_code: String,
    pub role: Role,
}

pub struct ConnectionBinder {
    bindings: RwLock<HashMap<ConnectionId, Binding>>,
}

impl ConnectionBinder {
    pub fn new() -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// Binds a connection to a durable identity within a room. Rebinding
    /// an already-bound connection replaces the previous binding (a
    /// client that leaves one room and joins another reuses its socket).
    pub async fn bind(
        &self,
        connection_id: ConnectionId,
        durable_id: String,
        room_code: String,
        role: Role,
    ) {
        let mut bindings = self.bindings.write().await;
        bindings.insert(
            connection_id,
            Binding {
                durable_id,
                room_code,
                role,
            },
        );
    }

    pub async fn resolve(&self, connection_id: ConnectionId) -> Option<Binding> {
        let bindings = self.bindings.read().await;
        bindings.get(&connection_id).cloned()
    }

    /// Removes the binding on disconnect. The participant behind it is
    /// untouched; only its live connection goes away, which is what makes
    /// a later rejoin resume the same score and answer history.
    pub async fn unbind(&self, connection_id: ConnectionId) -> Option<Binding> {
        let mut bindings = self.bindings.write().await;
        bindings.remove(&connection_id)
    }
}

impl Default for ConnectionBinder {
    fn default() -> Self {
        Self::new()
    }
}
