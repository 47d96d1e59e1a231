//! Domain types shared by the store, the API client, and the live channel.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ValidationError;

/// Lower bound accepted for `max_papers`.
pub const MIN_PAPERS: u32 = 1;
/// Upper bound accepted for `max_papers`.
pub const MAX_PAPERS: u32 = 500;
/// Paper count used when the caller does not pick one.
pub const DEFAULT_MAX_PAPERS: u32 = 50;

/// A paper as reported by the backend. Later stages fill in the optional
/// scoring, grouping, and ranking fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub paper_id: String,
    pub title: String,
    #[serde(default)]
    pub r#abstract: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub citation_count: u64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methodology: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_rank: Option<u32>,
}

impl Paper {
    /// Case-insensitive match against title, abstract, and author names.
    /// `needle` must already be lowercased.
    pub fn matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self
                .r#abstract
                .as_deref()
                .is_some_and(|a| a.to_lowercase().contains(needle))
            || self
                .authors
                .iter()
                .any(|author| author.to_lowercase().contains(needle))
    }
}

/// Papers grouped under a theme or methodology name.
pub type PaperGroups = BTreeMap<String, Vec<Paper>>;

/// The synthesis report produced by stage 6.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiteratureReviewReport {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub total_papers: u64,
    #[serde(default)]
    pub papers_by_theme: BTreeMap<String, u64>,
    #[serde(default)]
    pub papers_by_methodology: BTreeMap<String, u64>,
    #[serde(default)]
    pub top_papers: Vec<Paper>,
    #[serde(default)]
    pub synthesis: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub generated_at: Option<String>,
}

/// A validated pipeline query, as sent to the start endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineQuery {
    pub keywords: Vec<String>,
    pub max_papers: u32,
}

impl PipelineQuery {
    /// Normalize and validate a query.
    ///
    /// Keywords are trimmed, blanks dropped, and duplicates removed keeping
    /// the first occurrence. An empty result is rejected.
    pub fn new<I, S>(keywords: I, max_papers: u32) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for keyword in keywords {
            let trimmed = keyword.as_ref().trim();
            if !trimmed.is_empty() && !normalized.iter().any(|k| k == trimmed) {
                normalized.push(trimmed.to_string());
            }
        }
        if normalized.is_empty() {
            return Err(ValidationError::EmptyKeywords);
        }
        if !(MIN_PAPERS..=MAX_PAPERS).contains(&max_papers) {
            return Err(ValidationError::MaxPapersOutOfRange {
                value: max_papers,
                min: MIN_PAPERS,
                max: MAX_PAPERS,
            });
        }
        Ok(Self {
            keywords: normalized,
            max_papers,
        })
    }

    /// Human-readable query text used in run history.
    pub fn query_text(&self) -> String {
        self.keywords.join(", ")
    }
}

/// Status of a single pipeline stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
}

impl StageStatus {
    /// Completed and errored stages are frozen until the run is reset.
    pub fn is_terminal(self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Error)
    }

    /// Whether moving from `self` to `next` follows
    /// pending -> running -> {completed, error}.
    pub fn can_transition_to(self, next: StageStatus) -> bool {
        match self {
            StageStatus::Pending => true,
            StageStatus::Running => next != StageStatus::Pending,
            StageStatus::Completed | StageStatus::Error => false,
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "pending"),
            StageStatus::Running => write!(f, "running"),
            StageStatus::Completed => write!(f, "completed"),
            StageStatus::Error => write!(f, "error"),
        }
    }
}

/// Top-level navigational view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    #[default]
    Pipeline,
    Results,
}

/// Tabs of the results view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultTab {
    #[default]
    Papers,
    Themes,
    Methodologies,
    Rankings,
    Report,
    Pdf,
}

/// Sort order for the paper list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PaperSort {
    #[default]
    Relevance,
    Citations,
    Year,
}
