use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use super::broadcaster;
use super::connection::Connection;
use super::messages::WSMessage;
use super::registry::ConnectionRegistry;

const READ_IDLE_DEADLINE: Duration = Duration::from_secs(90);

/// Checks whether `msg` is a well-formed `hello_ack` echoing `expected_token`.
pub fn is_valid_hello_ack(msg: &Message, expected_token: &str) -> bool {
    let Message::Text(text) = msg else {
        return false;
    };
    let Ok(parsed) = serde_json::from_str::<WSMessage>(text) else {
        return false;
    };
    parsed.kind == "hello_ack" && parsed.payload.get("token").and_then(|v| v.as_str()) == Some(expected_token)
}

/// Steady-state per-connection loop: one task per connection. Runs until
/// the peer closes, a read error occurs, the 90-second read-idle deadline
/// elapses, or `close_pending` is set by another task.
pub async fn run(connection: Arc<Connection>, registry: ConnectionRegistry, mut stream: SplitStream<WebSocket>) {
    let id = connection.id;

    loop {
        if connection.is_close_pending() {
            debug!(connection_id = %id, "close requested, exiting reader loop");
            break;
        }

        match tokio::time::timeout(READ_IDLE_DEADLINE, stream.next()).await {
            Ok(Some(Ok(message))) => {
                if handle_message(&connection, &registry, message).await.is_break() {
                    break;
                }
            }
            Ok(Some(Err(err))) => {
                warn!(connection_id = %id, error = %err, "websocket read error");
                break;
            }
            Ok(None) => {
                debug!(connection_id = %id, "connection closed by peer");
                break;
            }
            Err(_) => {
                warn!(connection_id = %id, "read idle deadline elapsed");
                break;
            }
        }
    }

    cleanup(&registry, id).await;
}

async fn handle_message(
    connection: &Arc<Connection>,
    registry: &ConnectionRegistry,
    message: Message,
) -> std::ops::ControlFlow<()> {
    match message {
        Message::Text(text) => {
            let Ok(parsed) = serde_json::from_str::<WSMessage>(&text) else {
                debug!("ignoring malformed frame");
                return std::ops::ControlFlow::Continue(());
            };
            dispatch(connection, registry, parsed).await;
            std::ops::ControlFlow::Continue(())
        }
        Message::Close(_) => std::ops::ControlFlow::Break(()),
        Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => std::ops::ControlFlow::Continue(()),
    }
}

async fn dispatch(connection: &Arc<Connection>, registry: &ConnectionRegistry, message: WSMessage) {
    match message.kind.as_str() {
        "ping" => {
            broadcaster::send(registry, &connection.id, &WSMessage::pong(chrono::Local::now())).await;
        }
        other => debug!(connection_id = %connection.id, kind = other, "ignoring unrecognized frame type"),
    }
}

async fn cleanup(registry: &ConnectionRegistry, id: uuid::Uuid) {
    registry.remove(&id);
    info!(
        connection_id = %id,
        authenticated_remaining = registry.authenticated_count(),
        "connection closed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_hello_ack() {
        let msg = Message::Text(r#"{"type":"hello_ack","payload":{"token":"abc"}}"#.into());
        assert!(is_valid_hello_ack(&msg, "abc"));
    }

    #[test]
    fn rejects_mismatched_token() {
        let msg = Message::Text(r#"{"type":"hello_ack","payload":{"token":"wrong"}}"#.into());
        assert!(!is_valid_hello_ack(&msg, "abc"));
    }

    #[test]
    fn rejects_wrong_type() {
        let msg = Message::Text(r#"{"type":"ping","payload":{"token":"abc"}}"#.into());
        assert!(!is_valid_hello_ack(&msg, "abc"));
    }

    #[test]
    fn rejects_non_text_frames() {
        let msg = Message::Binary(vec![1, 2, 3].into());
        assert!(!is_valid_hello_ack(&msg, "abc"));
    }
}
