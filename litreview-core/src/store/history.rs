//! Bounded, persisted history of finished runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use super::stage::Stage;
use crate::persistence;
use crate::types::LiteratureReviewReport;

/// Number of runs kept when no bound is configured.
pub const DEFAULT_MAX_HISTORY: usize = 10;

/// Run id recorded when a run is archived without a known session id.
pub const PLACEHOLDER_RUN_ID: &str = "unknown-session";

/// Immutable snapshot of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunHistoryEntry {
    pub id: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_papers: Option<u32>,
    pub timestamp: DateTime<Utc>,
    pub stages: Vec<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<LiteratureReviewReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<String>,
    #[serde(default)]
    pub paper_count: usize,
}

/// On-disk layout of the history record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedHistory {
    pub pipeline_history: Vec<RunHistoryEntry>,
    pub max_history_size: usize,
}

impl Default for PersistedHistory {
    fn default() -> Self {
        Self {
            pipeline_history: Vec::new(),
            max_history_size: DEFAULT_MAX_HISTORY,
        }
    }
}

/// Ring buffer of archived runs, newest first.
#[derive(Debug, Clone)]
pub struct RunHistory {
    entries: VecDeque<RunHistoryEntry>,
    max_size: usize,
    path: Option<PathBuf>,
    /// Bumped on every mutation; orders deferred writes.
    generation: u64,
    /// When set, mutations only mark the record dirty and the owner flushes
    /// it through [`RunHistory::take_pending_write`].
    deferred: bool,
    dirty: bool,
}

/// A history record captured under the store lock, to be written after it
/// is released.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    path: PathBuf,
    generation: u64,
    record: PersistedHistory,
}

/// Serializes deferred writes and discards records older than the last one
/// written.
#[derive(Debug, Default)]
pub(crate) struct HistoryWriter {
    written: Mutex<u64>,
}

impl HistoryWriter {
    pub(crate) fn write(&self, pending: PendingWrite) {
        let mut written = self.written.lock().unwrap_or_else(|p| p.into_inner());
        if pending.generation <= *written {
            debug!(generation = pending.generation, "Skipping stale history write");
            return;
        }
        if let Err(e) = persistence::atomic_write_json(&pending.path, &pending.record) {
            warn!(path = %pending.path.display(), error = %e, "Failed to persist run history");
            return;
        }
        *written = pending.generation;
    }
}

impl Default for RunHistory {
    fn default() -> Self {
        Self::in_memory(DEFAULT_MAX_HISTORY)
    }
}

impl RunHistory {
    /// A history that is never written to disk.
    pub fn in_memory(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_size: max_size.max(1),
            path: None,
            generation: 0,
            deferred: false,
            dirty: false,
        }
    }

    /// Load the record at `path`, keeping at most `max_size` newest entries.
    /// A missing or corrupt record starts an empty history.
    pub fn load(path: impl Into<PathBuf>, max_size: usize) -> Self {
        let path = path.into();
        let record: PersistedHistory = persistence::load_json_or_default(&path);
        let max_size = max_size.max(1);
        let mut entries: VecDeque<RunHistoryEntry> = record.pipeline_history.into();
        entries.truncate(max_size);
        debug!(path = %path.display(), entries = entries.len(), "Loaded run history");
        Self {
            entries,
            max_size,
            path: Some(path),
            generation: 0,
            deferred: false,
            dirty: false,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries newest first.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = &RunHistoryEntry> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&RunHistoryEntry> {
        self.entries.get(index)
    }

    /// Insert at the front, evicting the oldest entry past the bound.
    pub fn push(&mut self, entry: RunHistoryEntry) {
        self.entries.push_front(entry);
        while self.entries.len() > self.max_size {
            if let Some(evicted) = self.entries.pop_back() {
                debug!(run = %evicted.id, "Evicted oldest run from history");
            }
        }
        self.persist();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.persist();
    }

    /// The record as it is written to disk.
    pub fn to_record(&self) -> PersistedHistory {
        PersistedHistory {
            pipeline_history: self.entries.iter().cloned().collect(),
            max_history_size: self.max_size,
        }
    }

    /// Stop writing on mutation; the owner flushes via
    /// [`RunHistory::take_pending_write`] instead.
    pub(crate) fn defer_writes(&mut self) {
        self.deferred = true;
    }

    /// The record to write, if a deferred mutation happened since the last call.
    pub(crate) fn take_pending_write(&mut self) -> Option<PendingWrite> {
        if !std::mem::take(&mut self.dirty) {
            return None;
        }
        Some(PendingWrite {
            path: self.path.clone()?,
            generation: self.generation,
            record: self.to_record(),
        })
    }

    fn persist(&mut self) {
        let Some(path) = &self.path else {
            return;
        };
        self.generation += 1;
        if self.deferred {
            self.dirty = true;
            return;
        }
        if let Err(e) = persistence::atomic_write_json(path, &self.to_record()) {
            warn!(path = %path.display(), error = %e, "Failed to persist run history");
        }
    }
}
