//! Follows the newest `upwork.*.log` file across appends, rotations,
//! copy-truncate and forced daily re-scans, emitting each newly observed
//! capture event exactly once.

mod state;

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{Local, TimeZone};
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TailerError;
use crate::event::LogEvent;
use crate::selector;

use state::TailState;

/// Spawns the tailer on its own task, returning the channel on which
/// detected events arrive. The task exits once `cancel` is triggered.
pub fn spawn(directory: PathBuf, cancel: CancellationToken) -> mpsc::UnboundedReceiver<LogEvent> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    tokio::spawn(run(directory, cancel, event_tx));
    event_rx
}

/// Runs the tailer loop until `cancel` fires. Exposed directly for tests
/// and for callers that want to drive their own delivery channel.
pub async fn run(directory: PathBuf, cancel: CancellationToken, event_tx: mpsc::UnboundedSender<LogEvent>) {
    let mut state = TailState::new();

    reevaluate(&directory, &mut state, &event_tx);

    let (fs_tx, mut fs_rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();
    let _watcher = match create_watcher(&directory, fs_tx) {
        Ok(watcher) => Some(watcher),
        Err(source) => {
            let err = TailerError::Watch {
                path: directory.clone(),
                source,
            };
            warn!(error = %err, "relying on midnight refresh only");
            None
        }
    };

    let mut midnight_deadline = Instant::now() + duration_until_next_midnight();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                state.close_current();
                info!("tailer shutting down");
                return;
            }

            _ = tokio::time::sleep_until(midnight_deadline) => {
                debug!("midnight refresh: re-evaluating newest log file");
                reevaluate(&directory, &mut state, &event_tx);
                midnight_deadline = Instant::now() + duration_until_next_midnight();
            }

            maybe_event = fs_rx.recv() => {
                match maybe_event {
                    Some(Ok(event)) => handle_fs_event(event, &directory, &mut state, &event_tx),
                    Some(Err(err)) => warn!(error = %err, "filesystem watcher error"),
                    None => {
                        warn!("filesystem watcher channel closed unexpectedly");
                        // Fall back to periodic midnight-interval-only re-evaluation
                        // rather than spinning; the select loop still honors cancellation.
                    }
                }
            }
        }
    }
}

fn create_watcher(
    directory: &Path,
    fs_tx: mpsc::UnboundedSender<notify::Result<notify::Event>>,
) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let _ = fs_tx.send(res);
    })?;
    watcher.watch(directory, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

fn handle_fs_event(
    event: notify::Event,
    directory: &Path,
    state: &mut TailState,
    event_tx: &mpsc::UnboundedSender<LogEvent>,
) {
    match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => {
            if event.paths.iter().any(|p| is_candidate_path(p)) {
                reevaluate(directory, state, event_tx);
            }
        }
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            let is_current = state
                .current_path()
                .is_some_and(|current| event.paths.iter().any(|p| p == current));
            if is_current && let Err(source) = state.drain(event_tx) {
                let err = TailerError::Read {
                    path: state.current_path().map(Path::to_path_buf).unwrap_or_default(),
                    source,
                };
                warn!(error = %err, "re-evaluating newest file");
                reevaluate(directory, state, event_tx);
            }
        }
        EventKind::Access(_) | EventKind::Other | EventKind::Any => {}
    }
}

fn is_candidate_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(selector::is_candidate_log_name)
}

/// Re-selects the newest log file; if it differs from the one currently
/// open, closes the current file (idempotent) and opens the new one,
/// seeking to its end.
fn reevaluate(directory: &Path, state: &mut TailState, event_tx: &mpsc::UnboundedSender<LogEvent>) {
    let newest = selector::select_newest(directory);

    if newest.as_deref() == state.current_path() {
        return;
    }

    state.close_current();

    if let Some(path) = newest {
        match state.open_at_end(path.clone()) {
            Ok(()) => info!(path = %path.display(), "tailing log file"),
            Err(source) => {
                let err = TailerError::Open { path, source };
                warn!(error = %err, "will retry on the next event or midnight tick");
            }
        }
    }

    // A rotation can deliver the append that triggered it before the
    // rename/create event is observed; drain immediately in case content
    // is already waiting.
    if let Err(source) = state.drain(event_tx) {
        let err = TailerError::Read {
            path: state.current_path().map(Path::to_path_buf).unwrap_or_default(),
            source,
        };
        warn!(error = %err, "read error during post-rotation drain");
    }
}

fn duration_until_next_midnight() -> StdDuration {
    let now = Local::now();
    let next_midnight = (now.date_naive() + chrono::Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time");

    let next_midnight_local = match Local.from_local_datetime(&next_midnight).single() {
        Some(dt) => dt,
        None => now + chrono::Duration::days(1),
    };

    (next_midnight_local - now)
        .to_std()
        .unwrap_or(StdDuration::from_secs(86_400))
}
