//! Durable JSON records: atomic writes and tolerant loads.
//!
//! Only the run history is written to disk. Writes go to a `.tmp` sibling
//! that is renamed over the target so a crash never leaves a torn record.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

/// Default file name of the persisted history record.
pub const HISTORY_RECORD_NAME: &str = "pipeline-storage.json";

/// Default location of the history record under the platform data dir.
pub fn default_history_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "litreview", "litreview")
        .map(|dirs| dirs.data_dir().join(HISTORY_RECORD_NAME))
}

/// Serialize `record` as pretty JSON and atomically replace `path`.
///
/// Parent directories are created on demand.
pub fn atomic_write_json<T: Serialize>(path: &Path, record: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(record).map_err(io::Error::other)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, path)
}

/// Load a JSON record. A missing file is `Ok(None)`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Load a JSON record, falling back to `T::default()` when the file is
/// missing or unreadable. Corruption is logged, never propagated.
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match load_json(path) {
        Ok(Some(record)) => record,
        Ok(None) => T::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Discarding unreadable record");
            T::default()
        }
    }
}
