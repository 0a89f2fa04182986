//! Bridges tailer events to the broadcaster with a typed
//! `screenshot_detected` payload.

use tokio::sync::mpsc;
use tracing::info;
use upwatch_core::LogEvent;

use crate::websocket::{self, ConnectionRegistry, WSMessage};

/// Consumes `events` until the channel closes, broadcasting a
/// `screenshot_detected` message for each one.
pub async fn run(mut events: mpsc::UnboundedReceiver<LogEvent>, registry: ConnectionRegistry) {
    while let Some(event) = events.recv().await {
        info!(timestamp = %event.timestamp, "screenshot detected");
        let message = WSMessage::screenshot_detected(&event);
        websocket::broadcast(&registry, &message).await;
    }
}
