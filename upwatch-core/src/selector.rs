//! Selects the newest `upwork.*.log` file in a watched directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const LOG_PREFIX: &str = "upwork.";
const LOG_SUFFIX: &str = ".log";

/// Returns `true` if `name` matches the fixed `upwork.*.log` glob.
pub fn is_candidate_log_name(name: &str) -> bool {
    name.starts_with(LOG_PREFIX) && name.ends_with(LOG_SUFFIX) && name.len() > LOG_PREFIX.len() + LOG_SUFFIX.len()
}

/// Scans `directory` for entries matching `upwork.*.log` and returns the one
/// with the greatest modification time, or `None` if no entry matches or the
/// directory cannot be read. Ties are broken arbitrarily (by directory
/// iteration order).
pub fn select_newest(directory: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(directory).ok()?;

    let mut newest: Option<(PathBuf, SystemTime)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !is_candidate_log_name(name) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let take = match &newest {
            None => true,
            Some((_, best)) => modified >= *best,
        };
        if take {
            newest = Some((path, modified));
        }
    }

    newest.map(|(path, _)| path)
}
