//! # Run State Store
//!
//! Single source of truth for the active pipeline run: identity, the seven
//! stages with their update history, result aggregates, view navigation, and
//! the persisted history of finished runs.
//!
//! [`RunStore`] holds the state and exposes every mutation as a method.
//! [`StoreHandle`] is the shared form handed to the live client and to
//! consumers: each operation runs under one lock acquisition, and a revision
//! counter on a watch channel tells observers that a new state is readable.

mod aggregates;
mod history;
mod stage;

use history::HistoryWriter;

pub use aggregates::{ResultAggregate, ResultAggregates};
pub use history::{
    DEFAULT_MAX_HISTORY, PLACEHOLDER_RUN_ID, PersistedHistory, RunHistory, RunHistoryEntry,
};
pub use stage::{
    FINAL_STAGE, STAGE_HISTORY_LIMIT, STAGE_NAMES, Stage, StagePatch, StageUpdateEntry,
};

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::types::{Paper, PaperSort, PipelineQuery, ResultTab, StageStatus, View};

/// Aggregate progress of the current run, as shown in the summary header.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSummary {
    /// Mean progress over all stages, 0.0..=100.0.
    pub overall_progress: f64,
    pub completed_stages: usize,
    pub total_stages: usize,
    /// The first stage currently running, if any.
    pub current_stage: Option<u8>,
    pub started_at: Option<DateTime<Utc>>,
}

/// State of the active run plus the history of finished ones.
#[derive(Debug, Clone, Default)]
pub struct RunStore {
    session_id: Option<String>,
    query: Option<PipelineQuery>,
    is_running: bool,
    error: Option<String>,
    archived: bool,
    stages: Vec<Stage>,
    results: ResultAggregates,
    view: View,
    selected_tab: ResultTab,
    search_term: String,
    history: RunHistory,
}

impl RunStore {
    pub fn new(history: RunHistory) -> Self {
        Self {
            history,
            ..Self::default()
        }
    }

    // --- Accessors ---

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn query(&self) -> Option<&PipelineQuery> {
        self.query.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, id: u8) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn results(&self) -> &ResultAggregates {
        &self.results
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn selected_tab(&self) -> ResultTab {
        self.selected_tab
    }

    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    pub fn max_history_size(&self) -> usize {
        self.history.max_size()
    }

    // --- Run lifecycle ---

    /// Begin tracking a run the backend has accepted.
    pub fn start(&mut self, session_id: impl Into<String>, query: PipelineQuery) {
        let session_id = session_id.into();
        info!(session = %session_id, query = %query.query_text(), "Run started");
        self.session_id = Some(session_id);
        self.query = Some(query);
        self.is_running = true;
        self.error = None;
        self.archived = false;
        self.results = ResultAggregates::default();
    }

    /// Reset all seven stages to pending with empty history.
    pub fn initialize_stages(&mut self) {
        self.stages = Stage::initial_set();
    }

    /// Merge `patch` into stage `id`. Unknown ids and finished stages are
    /// left untouched and reported as `false`.
    pub fn update_stage(&mut self, id: u8, patch: StagePatch) -> bool {
        let Some(stage) = self.stages.iter_mut().find(|s| s.id == id) else {
            debug!(stage = id, "Update for unknown stage ignored");
            return false;
        };
        stage.apply(patch, Utc::now())
    }

    pub fn set_result(&mut self, aggregate: ResultAggregate) {
        debug!(kind = aggregate.kind(), "Result aggregate stored");
        self.results.set(aggregate);
    }

    /// Record the generated PDF. This is the terminal signal of a
    /// successful run: it stops the run and navigates to the results view.
    pub fn set_artifact_path(&mut self, path: impl Into<String>) {
        let path = path.into();
        info!(path = %path, "Run produced artifact");
        self.results.pdf_path = Some(path);
        self.is_running = false;
        self.view = View::Results;
    }

    /// Stop a run that completed without an artifact path.
    pub fn finish_run(&mut self) {
        self.is_running = false;
        self.view = View::Results;
    }

    /// Record a run-level failure. The view is left where it is.
    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(error = %message, "Run failed");
        self.error = Some(message);
        self.is_running = false;
    }

    /// Copy the current run into history. Returns `false` when this run has
    /// already been archived.
    pub fn archive_run(&mut self, query: &str) -> bool {
        if self.archived {
            debug!("Run already archived");
            return false;
        }
        let id = match &self.session_id {
            Some(id) => id.clone(),
            None => {
                warn!("Archiving run without a session id");
                PLACEHOLDER_RUN_ID.to_string()
            }
        };
        self.history.push(RunHistoryEntry {
            id,
            query: query.to_string(),
            max_papers: self.query.as_ref().map(|q| q.max_papers),
            timestamp: Utc::now(),
            stages: self.stages.clone(),
            report: self.results.report.clone(),
            pdf_path: self.results.pdf_path.clone(),
            paper_count: self.results.paper_count(),
        });
        self.archived = true;
        true
    }

    /// Archive using the stored query text.
    pub fn archive_current_run(&mut self) -> bool {
        let query = self
            .query
            .as_ref()
            .map(PipelineQuery::query_text)
            .unwrap_or_default();
        self.archive_run(&query)
    }

    /// Clear every live-run field. History is left alone.
    pub fn reset(&mut self) {
        let history = std::mem::take(&mut self.history);
        *self = Self::new(history);
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    // --- View navigation ---

    pub fn set_view(&mut self, view: View) {
        self.view = view;
    }

    pub fn set_selected_tab(&mut self, tab: ResultTab) {
        self.selected_tab = tab;
    }

    pub fn set_search_term(&mut self, term: impl Into<String>) {
        self.search_term = term.into();
    }

    // --- Derived views ---

    /// Papers filtered by the current search term.
    pub fn filtered_papers(&self, sort: PaperSort) -> Vec<&Paper> {
        self.results.filtered_papers(&self.search_term, sort)
    }

    pub fn stage_timeline(&self, id: u8, limit: usize) -> Vec<&StageUpdateEntry> {
        self.stage(id).map(|s| s.timeline(limit)).unwrap_or_default()
    }

    pub fn summary(&self) -> PipelineSummary {
        let total_stages = self.stages.len();
        let overall_progress = if total_stages == 0 {
            0.0
        } else {
            self.stages.iter().map(|s| f64::from(s.progress)).sum::<f64>() / total_stages as f64
        };
        PipelineSummary {
            overall_progress,
            completed_stages: self
                .stages
                .iter()
                .filter(|s| s.status == StageStatus::Completed)
                .count(),
            total_stages,
            current_stage: self
                .stages
                .iter()
                .find(|s| s.status == StageStatus::Running)
                .map(|s| s.id),
            started_at: self.stages.iter().filter_map(|s| s.started_at).min(),
        }
    }
}

/// Shared, observable handle to a [`RunStore`].
#[derive(Debug, Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<RunStore>>,
    revision: Arc<watch::Sender<u64>>,
    writer: Arc<HistoryWriter>,
}

impl Default for StoreHandle {
    fn default() -> Self {
        Self::new(RunStore::default())
    }
}

impl StoreHandle {
    /// History writes made through the handle land after the store lock is
    /// released.
    pub fn new(mut store: RunStore) -> Self {
        store.history.defer_writes();
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(store)),
            revision: Arc::new(revision),
            writer: Arc::new(HistoryWriter::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunStore> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply one mutation atomically and notify observers.
    pub fn update<R>(&self, f: impl FnOnce(&mut RunStore) -> R) -> R {
        let (out, pending) = {
            let mut store = self.lock();
            let out = f(&mut store);
            (out, store.history.take_pending_write())
        };
        if let Some(pending) = pending {
            self.writer.write(pending);
        }
        self.revision.send_modify(|rev| *rev += 1);
        out
    }

    /// Read a consistent view of the store.
    pub fn read<R>(&self, f: impl FnOnce(&RunStore) -> R) -> R {
        f(&self.lock())
    }

    /// A detached copy of the whole store.
    pub fn snapshot(&self) -> RunStore {
        self.lock().clone()
    }

    /// Receiver that changes whenever a mutation has been applied.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.read(RunStore::is_running)
    }

    /// Resolve once `predicate` holds for the store.
    pub async fn wait_for(&self, predicate: impl Fn(&RunStore) -> bool) {
        let mut changes = self.subscribe();
        loop {
            if self.read(&predicate) {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }
}
