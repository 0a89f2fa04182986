use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::Mutex;
use uuid::Uuid;

/// One live WebSocket peer.
///
/// The write lock *is* the transport handle: rather than marshalling all
/// writes through a per-connection actor task, writers acquire `sink`
/// directly. See the design notes for the trade-off this encodes.
pub struct Connection {
    pub id: Uuid,
    pub expected_token: String,
    sink: Mutex<SplitSink<WebSocket, Message>>,
    authenticated: AtomicBool,
    /// Set by the broadcaster or the handshake timeout path to request
    /// teardown; only the reader task performs the actual close, which
    /// avoids a double-close/read-from-closed race.
    close_pending: AtomicBool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("authenticated", &self.authenticated.load(Ordering::Relaxed))
            .field("close_pending", &self.close_pending.load(Ordering::Relaxed))
            .field("sink_locked", &self.sink.try_lock().is_err())
            .finish()
    }
}

impl Connection {
    pub fn new(id: Uuid, sink: SplitSink<WebSocket, Message>, expected_token: String) -> Self {
        Self {
            id,
            expected_token,
            sink: Mutex::new(sink),
            authenticated: AtomicBool::new(false),
            close_pending: AtomicBool::new(false),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn mark_authenticated(&self) {
        self.authenticated.store(true, Ordering::Release);
    }

    pub fn is_close_pending(&self) -> bool {
        self.close_pending.load(Ordering::Acquire)
    }

    pub fn request_close(&self) {
        self.close_pending.store(true, Ordering::Release);
    }

    /// Serializes `message` as JSON text and writes it under this
    /// connection's write lock. Any two calls on the same connection are
    /// totally ordered; writes across connections have no ordering
    /// guarantee with respect to one another.
    pub async fn send_json(&self, message: &super::messages::WSMessage) -> Result<(), axum::Error> {
        let text = serde_json::to_string(message).expect("WSMessage always serializes");
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into())).await
    }

    pub async fn close(&self, code: u16, reason: &'static str) {
        let mut sink = self.sink.lock().await;
        let frame = axum::extract::ws::CloseFrame {
            code,
            reason: reason.into(),
        };
        let _ = sink.send(Message::Close(Some(frame))).await;
    }
}

pub type SharedConnection = Arc<Connection>;
