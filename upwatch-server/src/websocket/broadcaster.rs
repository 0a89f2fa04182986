use tracing::warn;

use super::messages::WSMessage;
use super::registry::ConnectionRegistry;

/// Delivers `message` to every currently-authenticated connection.
///
/// Takes a snapshot from the registry, then writes to each connection
/// under its own write lock; a write failure marks that connection for
/// teardown and removes it from the registry, without affecting delivery
/// to the rest of the snapshot. Broadcast order within one call follows
/// snapshot iteration order, which is unspecified.
pub async fn broadcast(registry: &ConnectionRegistry, message: &WSMessage) {
    let connections = registry.authenticated_snapshot();

    for connection in connections {
        if let Err(err) = connection.send_json(message).await {
            warn!(connection_id = %connection.id, error = %err, "broadcast write failed, tearing down connection");
            connection.request_close();
            registry.remove(&connection.id);
        }
    }
}

/// Single-recipient send, used for handshake frames and `pong`. Shares the
/// same failure handling as `broadcast`.
pub async fn send(registry: &ConnectionRegistry, connection_id: &uuid::Uuid, message: &WSMessage) {
    let Some(connection) = registry.get(connection_id) else {
        return;
    };

    if let Err(err) = connection.send_json(message).await {
        warn!(connection_id = %connection_id, error = %err, "send failed, tearing down connection");
        connection.request_close();
        registry.remove(connection_id);
    }
}
