//! Plain-text rendering of store state for the terminal.

use std::collections::HashMap;

use litreview_core::store::RunHistoryEntry;
use litreview_core::{RunStore, StageStatus};

/// Prints one line per stage change, skipping snapshots that repeat what
/// was already shown.
#[derive(Debug, Default)]
pub struct ProgressPrinter {
    seen: HashMap<u8, (StageStatus, u8, String)>,
    error_shown: bool,
}

impl ProgressPrinter {
    /// Lines describing what changed since the previous call.
    pub fn changes(&mut self, store: &RunStore) -> Vec<String> {
        let mut lines = Vec::new();
        for stage in store.stages() {
            let current = (stage.status, stage.progress, stage.message.clone());
            if self.seen.get(&stage.id) == Some(&current) {
                continue;
            }
            if stage.status != StageStatus::Pending {
                lines.push(stage_line(stage.id, &stage.name, stage.status, stage.progress, &stage.message));
            }
            self.seen.insert(stage.id, current);
        }
        if let Some(error) = store.error() {
            if !self.error_shown {
                lines.push(format!("  ✗ Run failed: {error}"));
                self.error_shown = true;
            }
        }
        lines
    }
}

fn stage_line(id: u8, name: &str, status: StageStatus, progress: u8, message: &str) -> String {
    let marker = match status {
        StageStatus::Pending => "·",
        StageStatus::Running => "…",
        StageStatus::Completed => "✓",
        StageStatus::Error => "✗",
    };
    format!("  {marker} [{id}/7] {name:<22} {progress:>3}%  {message}")
}

/// Summary printed once the run has settled.
pub fn results_summary(store: &RunStore) -> Vec<String> {
    let mut lines = Vec::new();
    let summary = store.summary();
    lines.push(format!(
        "Stages completed: {}/{} ({:.0}% overall)",
        summary.completed_stages, summary.total_stages, summary.overall_progress
    ));

    let results = store.results();
    if results.papers.is_some() {
        lines.push(format!("Papers retrieved: {}", results.paper_count()));
    }
    if let Some(themes) = &results.themes {
        lines.push(format!("Themes: {}", join_keys(themes.keys())));
    }
    if let Some(methodologies) = &results.methodologies {
        lines.push(format!("Methodologies: {}", join_keys(methodologies.keys())));
    }
    let top = results.top_ranked(5);
    if !top.is_empty() {
        lines.push("Top ranked papers:".to_string());
        for (index, paper) in top.iter().enumerate() {
            let year = paper.year.map(|y| format!(" ({y})")).unwrap_or_default();
            lines.push(format!("  {}. {}{}", index + 1, paper.title, year));
        }
    }
    if let Some(report) = &results.report {
        lines.push(format!("Report: {} papers analysed", report.total_papers));
        if let Some(first) = report.synthesis.lines().find(|l| !l.trim().is_empty()) {
            lines.push(format!("  {}", first.trim()));
        }
    }
    if let Some(path) = &results.pdf_path {
        lines.push(format!("PDF: {path}"));
    }
    if let Some(error) = store.error() {
        lines.push(format!("Error: {error}"));
    }
    lines
}

fn join_keys<'a>(keys: impl Iterator<Item = &'a String>) -> String {
    keys.map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// One line per archived run, newest first.
pub fn history_line(index: usize, entry: &RunHistoryEntry) -> String {
    let outcome = match &entry.pdf_path {
        Some(_) => "completed",
        None if entry.stages.iter().any(|s| s.status == StageStatus::Error) => "failed",
        None => "finished",
    };
    format!(
        "{:>2}. {}  {:<10} {:<40} {} papers  [{}]",
        index + 1,
        entry.timestamp.format("%Y-%m-%d %H:%M"),
        outcome,
        entry.query,
        entry.paper_count,
        entry.id
    )
}
