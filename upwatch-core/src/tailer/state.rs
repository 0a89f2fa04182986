use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, SecondsFormat};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::LogEvent;

/// Literal substring that marks a log line as a capture event.
const SIGNATURE: &str = "Electron Screensnap succeeded";

/// Trailing window over which emitted timestamps are retained to prevent
/// duplicate emission across rotations and restarts.
const DEDUP_WINDOW: chrono::Duration = chrono::Duration::hours(48);

const READ_BUFFER_CAPACITY: usize = 64 * 1024;

/// Mutable state owned by the tailer task. Not shared across tasks.
pub(crate) struct TailState {
    current_path: Option<PathBuf>,
    reader: Option<BufReader<File>>,
    offset: u64,
    seen: HashMap<String, DateTime<Local>>,
    last_emitted: Option<DateTime<Local>>,
}

impl TailState {
    pub(crate) fn new() -> Self {
        Self {
            current_path: None,
            reader: None,
            offset: 0,
            seen: HashMap::new(),
            last_emitted: None,
        }
    }

    pub(crate) fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    /// Closes the currently open file, if any. Idempotent.
    pub(crate) fn close_current(&mut self) {
        self.current_path = None;
        self.reader = None;
        self.offset = 0;
    }

    /// Opens `path` and seeks to its current end, so pre-existing content is
    /// never replayed (P2).
    pub(crate) fn open_at_end(&mut self, path: PathBuf) -> std::io::Result<()> {
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        let mut reader = BufReader::with_capacity(READ_BUFFER_CAPACITY, file);
        reader.seek(SeekFrom::Start(len))?;

        self.offset = len;
        self.reader = Some(reader);
        self.current_path = Some(path);
        Ok(())
    }

    /// Drains all complete lines currently available on the open file,
    /// emitting a [`LogEvent`] for each qualifying, not-yet-seen line.
    ///
    /// Returns `Err` if a non-EOF read error occurred; the caller should
    /// treat this as a signal to re-evaluate the newest file.
    pub(crate) fn drain(&mut self, event_tx: &mpsc::UnboundedSender<LogEvent>) -> std::io::Result<()> {
        let Some(path) = self.current_path.clone() else {
            return Ok(());
        };

        loop {
            // Copy-truncate rotation: the file shrank under us. Reset to 0.
            if let Ok(metadata) = std::fs::metadata(&path)
                && metadata.len() < self.offset
            {
                debug!(path = %path.display(), "detected copy-truncate rotation, resetting offset");
                if let Some(reader) = &mut self.reader {
                    reader.seek(SeekFrom::Start(0))?;
                }
                self.offset = 0;
            }

            let Some(reader) = &mut self.reader else {
                return Ok(());
            };

            let mut line = String::new();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                // EOF: wait for the next write notification.
                return Ok(());
            }
            self.offset += read as u64;

            self.process_line(line.trim_end_matches(['\r', '\n']), event_tx);
        }
    }

    fn process_line(&mut self, line: &str, event_tx: &mpsc::UnboundedSender<LogEvent>) {
        if !line.contains(SIGNATURE) {
            return;
        }

        let Some(timestamp) = crate::timestamp::parse_leading_timestamp(line) else {
            return;
        };

        if let Some(last) = self.last_emitted
            && timestamp <= last
        {
            return;
        }

        let key = timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true);
        if self.seen.contains_key(&key) {
            return;
        }

        self.seen.insert(key, timestamp);
        self.last_emitted = Some(timestamp);
        self.prune_seen();

        if event_tx.send(LogEvent::new(timestamp, line)).is_err() {
            warn!("detection channel closed, dropping event");
        }
    }

    fn prune_seen(&mut self) {
        let now = Local::now();
        self.seen.retain(|_, ts| now.signed_duration_since(*ts) <= DEDUP_WINDOW);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::sync::mpsc::unbounded_channel;

    fn line(ts: &str) -> String {
        format!("[{ts}] Electron Screensnap succeeded.")
    }

    #[test]
    fn opens_at_end_and_skips_pre_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upwork.2025-05-12.log");
        std::fs::write(&path, line("2025-05-12T11:26:23.318")).unwrap();

        let mut state = TailState::new();
        state.open_at_end(path.clone()).unwrap();

        let (tx, mut rx) = unbounded_channel();
        state.drain(&tx).unwrap();
        drop(tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emits_newly_appended_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upwork.2025-05-12.log");
        std::fs::write(&path, "").unwrap();

        let mut state = TailState::new();
        state.open_at_end(path.clone()).unwrap();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{}", line("2025-05-12T11:26:23.318")).unwrap();

        let (tx, mut rx) = unbounded_channel();
        state.drain(&tx).unwrap();
        let event = rx.try_recv().expect("event should have been emitted");
        assert_eq!(event.timestamp.format("%H:%M:%S%.3f").to_string(), "11:26:23.318");
    }

    #[test]
    fn does_not_duplicate_same_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upwork.2025-05-12.log");
        std::fs::write(&path, "").unwrap();

        let mut state = TailState::new();
        state.open_at_end(path.clone()).unwrap();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{}", line("2025-05-12T11:26:23.318")).unwrap();
        writeln!(file, "{}", line("2025-05-12T11:26:23.318")).unwrap();

        let (tx, mut rx) = unbounded_channel();
        state.drain(&tx).unwrap();
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn rejects_timestamps_not_after_last_emitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upwork.2025-05-12.log");
        std::fs::write(&path, "").unwrap();

        let mut state = TailState::new();
        state.open_at_end(path.clone()).unwrap();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{}", line("2025-05-12T11:26:23.318")).unwrap();
        writeln!(file, "{}", line("2025-05-12T11:26:22.000")).unwrap();

        let (tx, mut rx) = unbounded_channel();
        state.drain(&tx).unwrap();
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn handles_copy_truncate_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upwork.2025-05-12.log");
        std::fs::write(&path, "").unwrap();

        let mut state = TailState::new();
        state.open_at_end(path.clone()).unwrap();

        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        writeln!(file, "{}", line("2025-05-12T11:26:23.318")).unwrap();

        let (tx, mut rx) = unbounded_channel();
        state.drain(&tx).unwrap();
        assert!(rx.try_recv().is_ok());

        // Simulate copy-truncate: truncate to zero, then append a fresh line.
        file.set_len(0).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        writeln!(file, "{}", line("2025-05-12T11:27:00.000")).unwrap();

        state.drain(&tx).unwrap();
        let event = rx.try_recv().expect("event after truncate should be emitted");
        assert_eq!(event.timestamp.format("%H:%M:%S%.3f").to_string(), "11:27:00.000");
    }
}
