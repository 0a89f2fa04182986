use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use super::connection::Connection;

/// Tracks open WebSocket connections. All mutating operations take the
/// map's internal per-shard locks; `authenticated_snapshot` copies handles
/// out before returning so iteration never holds a registry-wide lock.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<Uuid, Arc<Connection>>>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.connections.len())
            .finish()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly upgraded connection. Unauthenticated until
    /// `promote` is called.
    pub fn insert(&self, connection: Arc<Connection>) {
        self.connections.insert(connection.id, connection);
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| entry.clone())
    }

    /// Idempotent: removing an id that is not present is a no-op.
    pub fn remove(&self, id: &Uuid) {
        self.connections.remove(id);
    }

    /// Snapshot of every currently-authenticated connection, copied out
    /// from under the map's locks before the caller iterates.
    pub fn authenticated_snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_authenticated())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn authenticated_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_authenticated())
            .count()
    }
}
