//! Result collections produced by stage completions.

use serde::{Deserialize, Serialize};

use crate::types::{LiteratureReviewReport, Paper, PaperGroups, PaperSort};

/// One result collection, tagged by the stage that produces it.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultAggregate {
    /// Stage 1.
    Papers(Vec<Paper>),
    /// Stage 3.
    Themes(PaperGroups),
    /// Stage 4.
    Methodologies(PaperGroups),
    /// Stage 5.
    RankedPapers(Vec<Paper>),
    /// Stage 6.
    Report(LiteratureReviewReport),
}

impl ResultAggregate {
    pub fn kind(&self) -> &'static str {
        match self {
            ResultAggregate::Papers(_) => "papers",
            ResultAggregate::Themes(_) => "themes",
            ResultAggregate::Methodologies(_) => "methodologies",
            ResultAggregate::RankedPapers(_) => "ranked_papers",
            ResultAggregate::Report(_) => "report",
        }
    }
}

/// All result collections of the current run. Each stays `None` until its
/// stage delivers it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultAggregates {
    pub papers: Option<Vec<Paper>>,
    pub themes: Option<PaperGroups>,
    pub methodologies: Option<PaperGroups>,
    pub ranked_papers: Option<Vec<Paper>>,
    pub report: Option<LiteratureReviewReport>,
    pub pdf_path: Option<String>,
}

impl ResultAggregates {
    /// Replace one collection. Last writer wins.
    pub fn set(&mut self, aggregate: ResultAggregate) {
        match aggregate {
            ResultAggregate::Papers(papers) => self.papers = Some(papers),
            ResultAggregate::Themes(themes) => self.themes = Some(themes),
            ResultAggregate::Methodologies(groups) => self.methodologies = Some(groups),
            ResultAggregate::RankedPapers(ranked) => self.ranked_papers = Some(ranked),
            ResultAggregate::Report(report) => self.report = Some(report),
        }
    }

    pub fn paper_count(&self) -> usize {
        self.papers.as_ref().map_or(0, Vec::len)
    }

    /// Papers matching `search` (case-insensitive), sorted descending by `sort`.
    pub fn filtered_papers(&self, search: &str, sort: PaperSort) -> Vec<&Paper> {
        let needle = search.trim().to_lowercase();
        let mut papers: Vec<&Paper> = self
            .papers
            .iter()
            .flatten()
            .filter(|p| needle.is_empty() || p.matches(&needle))
            .collect();
        match sort {
            PaperSort::Relevance => papers.sort_by(|a, b| {
                b.relevance_score
                    .unwrap_or(0.0)
                    .total_cmp(&a.relevance_score.unwrap_or(0.0))
            }),
            PaperSort::Citations => papers.sort_by(|a, b| b.citation_count.cmp(&a.citation_count)),
            PaperSort::Year => papers.sort_by(|a, b| b.year.unwrap_or(0).cmp(&a.year.unwrap_or(0))),
        }
        papers
    }

    /// Ranked papers ordered by `final_rank`, unranked entries last.
    pub fn top_ranked(&self, limit: usize) -> Vec<&Paper> {
        let mut ranked: Vec<&Paper> = self.ranked_papers.iter().flatten().collect();
        ranked.sort_by_key(|p| p.final_rank.unwrap_or(u32::MAX));
        ranked.truncate(limit);
        ranked
    }
}
