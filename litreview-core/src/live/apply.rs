//! Translation of live events and poll results into store operations.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use super::events::{InboundEvent, progress_percent};
use crate::api::{PipelineStatus, StatusResponse};
use crate::store::{FINAL_STAGE, ResultAggregate, RunStore, StagePatch};
use crate::types::{LiteratureReviewReport, Paper, PaperGroups, StageStatus};

const DEFAULT_UPDATE_MESSAGE: &str = "Processing...";
const COMPLETED_MESSAGE: &str = "Completed";
const UNKNOWN_ERROR: &str = "Unknown error occurred";
const FAILED_WITHOUT_DETAIL: &str = "Pipeline failed";

/// Apply one inbound event to the store.
pub fn apply_event(store: &mut RunStore, event: InboundEvent) {
    match event {
        InboundEvent::Connected { session_id, message } => {
            info!(
                session = session_id.as_deref().unwrap_or_default(),
                message = message.as_deref().unwrap_or_default(),
                "Live channel acknowledged"
            );
        }
        InboundEvent::Pong => trace!("Keep-alive acknowledged"),
        InboundEvent::StageUpdate {
            stage,
            progress,
            message,
            data,
        } => {
            let patch = StagePatch::status(StageStatus::Running)
                .with_progress(progress_percent(progress))
                .with_message(message.unwrap_or_else(|| DEFAULT_UPDATE_MESSAGE.to_string()))
                .with_data(data);
            if store.update_stage(stage, patch) {
                debug!(stage, "Stage update merged");
            }
        }
        InboundEvent::StageComplete {
            stage,
            result,
            data,
        } => complete_stage(store, stage, result, data),
        InboundEvent::Error { stage, error } => {
            let message = error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
            store.set_error(message.clone());
            if let Some(stage) = stage {
                store.update_stage(
                    stage,
                    StagePatch::status(StageStatus::Error)
                        .with_message(message)
                        .with_ended_at(Utc::now()),
                );
            }
        }
        InboundEvent::Unknown => warn!("Dropping event with unknown type"),
    }
}

fn complete_stage(store: &mut RunStore, stage: u8, result: Option<Value>, data: Option<Value>) {
    let patch = StagePatch::status(StageStatus::Completed)
        .with_progress(100)
        .with_message(COMPLETED_MESSAGE)
        .with_result(result.clone())
        .with_data(data.clone())
        .with_ended_at(Utc::now());
    // A completion for an unknown or already finished stage is stale: its
    // payload must not reach the results or end the run.
    if !store.update_stage(stage, patch) {
        debug!(stage, "Dropping stale stage completion");
        return;
    }
    debug!(stage, "Stage completed");

    let aggregate = match stage {
        1 => field::<Vec<Paper>>(data.as_ref(), "papers").map(ResultAggregate::Papers),
        3 => field::<PaperGroups>(data.as_ref(), "themes").map(ResultAggregate::Themes),
        4 => field::<PaperGroups>(data.as_ref(), "methodologies")
            .map(ResultAggregate::Methodologies),
        5 => field::<Vec<Paper>>(data.as_ref(), "ranked_papers").map(ResultAggregate::RankedPapers),
        6 => field::<LiteratureReviewReport>(data.as_ref(), "report").map(ResultAggregate::Report),
        _ => None,
    };
    if let Some(aggregate) = aggregate {
        store.set_result(aggregate);
    }

    if stage == FINAL_STAGE {
        let pdf_path = field::<String>(result.as_ref(), "pdf_path")
            .or_else(|| field::<String>(data.as_ref(), "pdf_path"))
            .filter(|path| !path.is_empty());
        if let Some(path) = pdf_path {
            store.set_artifact_path(path);
            store.archive_current_run();
        }
    }
}

/// Apply a status poll response. Returns `true` when the run is finished.
pub fn apply_status(store: &mut RunStore, status: StatusResponse) -> bool {
    match status.status {
        PipelineStatus::Running | PipelineStatus::Unknown => false,
        PipelineStatus::Completed => {
            let result = status.result.as_ref();
            if let Some(papers) = field::<Vec<Paper>>(result, "papers") {
                store.set_result(ResultAggregate::Papers(papers));
            }
            if let Some(themes) = field::<PaperGroups>(result, "themes") {
                store.set_result(ResultAggregate::Themes(themes));
            }
            if let Some(groups) = field::<PaperGroups>(result, "methodologies") {
                store.set_result(ResultAggregate::Methodologies(groups));
            }
            if let Some(ranked) = field::<Vec<Paper>>(result, "ranked_papers") {
                store.set_result(ResultAggregate::RankedPapers(ranked));
            }
            if let Some(report) = field::<LiteratureReviewReport>(result, "report") {
                store.set_result(ResultAggregate::Report(report));
            }
            match field::<String>(result, "pdf_path").filter(|p| !p.is_empty()) {
                Some(path) => store.set_artifact_path(path),
                None => store.finish_run(),
            }
            store.archive_current_run();
            true
        }
        PipelineStatus::Failed => {
            store.set_error(
                status
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| FAILED_WITHOUT_DETAIL.to_string()),
            );
            true
        }
    }
}

/// Decode `container[key]`, logging and skipping payloads of the wrong shape.
fn field<T: DeserializeOwned>(container: Option<&Value>, key: &str) -> Option<T> {
    let value = container?.get(key)?;
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(field = key, error = %e, "Ignoring malformed result payload");
            None
        }
    }
}
