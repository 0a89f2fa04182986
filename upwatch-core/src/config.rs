//! Collaborator-supplied configuration: a small JSON file the daemon reads
//! at startup. Discovery, persistence and interactive setup are out of
//! scope here; this module only knows how to parse and recover from a
//! bad file.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::error::ConfigError;

const LOGS_DIR_ENV_OVERRIDE: &str = "UPWORK_LOGS_DIR";

/// Parsed daemon configuration.
#[derive(Debug, Clone, Default)]
pub struct DaemonConfig {
    pub upwork_logs_dir: PathBuf,
    /// Accepted but not honored — see the design notes on port selection.
    pub web_socket_port: Option<u16>,
    pub log_path: Option<PathBuf>,
    pub debug_mode: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawConfig {
    upwork_logs_dir: Option<PathBuf>,
    web_socket_port: Option<u16>,
    log_path: Option<PathBuf>,
    debug_mode: bool,
}

impl From<RawConfig> for DaemonConfig {
    fn from(raw: RawConfig) -> Self {
        Self {
            upwork_logs_dir: raw.upwork_logs_dir.unwrap_or_default(),
            web_socket_port: raw.web_socket_port,
            log_path: raw.log_path,
            debug_mode: raw.debug_mode,
        }
    }
}

/// Loads configuration from `path`.
///
/// If `path` does not exist, returns defaults. If the file exists but
/// contains invalid JSON, the offending file is renamed to a
/// `<name>.bak-<timestamp>` sibling (best-effort; a rename failure is
/// logged, not fatal) and `ConfigError::InvalidJson` is returned so the
/// caller can fall back to defaults while surfacing the failure.
///
/// The `UPWORK_LOGS_DIR` environment variable, when set, always overrides
/// `upworkLogsDir` regardless of what was parsed from the file.
pub fn load(path: &Path) -> Result<DaemonConfig, ConfigError> {
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let raw: RawConfig = match serde_json::from_str(&contents) {
            Ok(raw) => raw,
            Err(source) => {
                backup_invalid_config(path);
                return Err(ConfigError::InvalidJson {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        DaemonConfig::from(raw)
    } else {
        DaemonConfig::default()
    };

    if let Ok(dir) = std::env::var(LOGS_DIR_ENV_OVERRIDE) {
        config.upwork_logs_dir = PathBuf::from(dir);
    }

    Ok(config)
}

fn backup_invalid_config(path: &Path) {
    let suffix = chrono::Local::now()
        .format("%Y-%m-%dT%H-%M-%S%.f")
        .to_string();
    let backup_name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => format!("{name}.bak-{suffix}"),
        None => return,
    };
    let backup_path = path.with_file_name(backup_name);

    if let Err(err) = std::fs::rename(path, &backup_path) {
        warn!(
            path = %path.display(),
            backup = %backup_path.display(),
            error = %err,
            "failed to back up invalid config file"
        );
    }
}
