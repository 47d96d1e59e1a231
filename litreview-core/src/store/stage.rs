//! Pipeline stages and their bounded update history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::debug;

use crate::types::StageStatus;

/// Display names of the seven pipeline stages, indexed by `id - 1`.
pub const STAGE_NAMES: [&str; 7] = [
    "Fetching Papers",
    "Relevance Scoring",
    "Theme Clustering",
    "Methodology Grouping",
    "Final Ranking",
    "Synthesis Report",
    "PDF Generation",
];

/// Id of the last stage. Its completion is the terminal signal of a run.
pub const FINAL_STAGE: u8 = STAGE_NAMES.len() as u8;

/// Maximum number of update snapshots kept per stage (oldest evicted first).
pub const STAGE_HISTORY_LIMIT: usize = 50;

const INITIAL_MESSAGE: &str = "Waiting...";

/// One snapshot in a stage's update history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageUpdateEntry {
    pub timestamp: DateTime<Utc>,
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A pipeline stage owned by the current run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: u8,
    pub name: String,
    pub status: StageStatus,
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    history: VecDeque<StageUpdateEntry>,
}

/// Partial update merged into a stage. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagePatch {
    pub status: Option<StageStatus>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub result: Option<Value>,
    pub data: Option<Value>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StagePatch {
    pub fn status(status: StageStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_result(mut self, result: Option<Value>) -> Self {
        self.result = result;
        self
    }

    pub fn with_data(mut self, data: Option<Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_ended_at(mut self, at: DateTime<Utc>) -> Self {
        self.ended_at = Some(at);
        self
    }
}

impl Stage {
    /// A fresh pending stage.
    pub fn pending(id: u8, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: StageStatus::Pending,
            progress: 0,
            message: INITIAL_MESSAGE.to_string(),
            result: None,
            data: None,
            started_at: None,
            ended_at: None,
            history: VecDeque::new(),
        }
    }

    /// The full ordered stage list, all pending.
    pub fn initial_set() -> Vec<Stage> {
        STAGE_NAMES
            .iter()
            .enumerate()
            .map(|(index, name)| Stage::pending(index as u8 + 1, *name))
            .collect()
    }

    /// Update snapshots in arrival order, oldest first.
    pub fn history(&self) -> impl ExactSizeIterator<Item = &StageUpdateEntry> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Elapsed time between start and end, when both are known.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.ended_at? - self.started_at?)
    }

    /// Merge `patch` into this stage and record a history snapshot.
    ///
    /// Returns `false` when the stage is terminal; such patches are dropped
    /// whole. A status that would move backwards is ignored while the other
    /// fields still merge. Progress decreases are applied as-is.
    pub(crate) fn apply(&mut self, patch: StagePatch, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            debug!(stage = self.id, status = %self.status, "Dropping update for finished stage");
            return false;
        }

        if let Some(next) = patch.status {
            if self.status.can_transition_to(next) {
                if next != StageStatus::Pending && self.started_at.is_none() {
                    self.started_at = Some(now);
                }
                self.status = next;
            } else {
                debug!(stage = self.id, from = %self.status, to = %next, "Ignoring status regression");
            }
        }
        if let Some(progress) = patch.progress {
            let progress = progress.min(100);
            if self.status == StageStatus::Running && progress < self.progress {
                debug!(
                    stage = self.id,
                    previous = self.progress,
                    progress,
                    "Progress moved backwards"
                );
            }
            self.progress = progress;
        }
        if let Some(message) = patch.message {
            self.message = message;
        }
        if patch.result.is_some() {
            self.result = patch.result;
        }
        if patch.data.is_some() {
            self.data = patch.data;
        }
        if patch.ended_at.is_some() {
            self.ended_at = patch.ended_at;
        }

        self.record(now);
        true
    }

    fn record(&mut self, now: DateTime<Utc>) {
        if self.history.len() == STAGE_HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(StageUpdateEntry {
            timestamp: now,
            progress: self.progress,
            message: self.message.clone(),
            data: self.data.clone(),
        });
    }

    /// The last `limit` history entries after collapsing repeated messages
    /// (first occurrence of each message wins).
    pub fn timeline(&self, limit: usize) -> Vec<&StageUpdateEntry> {
        let mut unique: Vec<&StageUpdateEntry> = Vec::new();
        for entry in &self.history {
            if !unique.iter().any(|seen| seen.message == entry.message) {
                unique.push(entry);
            }
        }
        let skip = unique.len().saturating_sub(limit);
        unique.into_iter().skip(skip).collect()
    }
}
