use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The envelope exchanged over `/ws`: a string `type` tag plus a loosely
/// typed `payload`. Kept as a flat struct rather than a closed enum so the
/// debug-only test-broadcast passthrough can carry arbitrary payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WSMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl WSMessage {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    pub fn hello(token: &str, version: &str) -> Self {
        Self::new("hello", json!({ "token": token, "version": version }))
    }

    pub fn connected(timestamp: chrono::DateTime<chrono::Local>) -> Self {
        Self::new("connected", json!({ "timestamp": timestamp.to_rfc3339() }))
    }

    pub fn pong(timestamp: chrono::DateTime<chrono::Local>) -> Self {
        Self::new("pong", json!({ "timestamp": timestamp.to_rfc3339() }))
    }

    pub fn screenshot_detected(event: &upwatch_core::LogEvent) -> Self {
        Self::new(
            "screenshot_detected",
            json!({
                "timestamp": event.timestamp.format("%H:%M:%S").to_string(),
                "time": event.timestamp.to_rfc3339(),
            }),
        )
    }
}
