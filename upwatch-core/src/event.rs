use chrono::{DateTime, Local};

/// A single detected capture occurrence, produced by the tailer and
/// consumed exactly once by the detection bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub timestamp: DateTime<Local>,
    pub source_line: String,
}

impl LogEvent {
    pub fn new(timestamp: DateTime<Local>, source_line: impl Into<String>) -> Self {
        Self {
            timestamp,
            source_line: source_line.into(),
        }
    }
}
