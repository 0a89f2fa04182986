use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocket;
use futures_util::StreamExt;
use rand::RngCore;
use tracing::{info, warn};
use uuid::Uuid;

use super::broadcaster;
use super::connection::Connection;
use super::messages::WSMessage;
use super::registry::ConnectionRegistry;
use super::reader;

const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(5);
const POLICY_VIOLATION: u16 = 1008;

/// Runs the challenge/response handshake for a freshly upgraded socket,
/// then hands off to the reader task loop (§4.6) for the connection's
/// lifetime.
pub async fn handle(socket: WebSocket, registry: ConnectionRegistry) {
    let (sink, mut stream) = socket.split();

    let id = Uuid::now_v7();
    let token = generate_token();
    let connection = Arc::new(Connection::new(id, sink, token.clone()));
    registry.insert(connection.clone());

    broadcaster::send(&registry, &id, &WSMessage::hello(&token, env!("CARGO_PKG_VERSION"))).await;
    if registry.get(&id).is_none() {
        // The hello write failed; broadcaster::send already tore the
        // connection down.
        return;
    }

    let ack = tokio::time::timeout(HANDSHAKE_DEADLINE, stream.next()).await;

    match ack {
        Ok(Some(Ok(msg))) if reader::is_valid_hello_ack(&msg, &token) => {
            connection.mark_authenticated();
            broadcaster::send(&registry, &id, &WSMessage::connected(chrono::Local::now())).await;
            info!(connection_id = %id, "client authenticated");
        }
        _ => {
            warn!(connection_id = %id, "handshake failed or timed out");
            connection.close(POLICY_VIOLATION, "handshake timeout or invalid token").await;
            registry.remove(&id);
            return;
        }
    }

    if registry.get(&id).is_none() {
        // The connected write failed; broadcaster::send already tore the
        // connection down, so there's no reader loop to start.
        return;
    }

    reader::run(connection, registry, stream).await;
}

fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
