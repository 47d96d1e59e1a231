//! Property-based tests for the run state store using proptest.

use proptest::prelude::*;

use litreview_core::store::{RunHistory, RunHistoryEntry, STAGE_HISTORY_LIMIT, Stage};
use litreview_core::{
    InboundEvent, PipelineQuery, ResultAggregate, RunStore, StagePatch, StageStatus, View,
    apply_event,
};

fn started() -> RunStore {
    let mut store = RunStore::default();
    store.start("session-1", PipelineQuery::new(["nlp"], 20).unwrap());
    store.initialize_stages();
    store
}

fn entry(id: usize) -> RunHistoryEntry {
    RunHistoryEntry {
        id: format!("run-{id}"),
        query: "nlp".into(),
        max_papers: Some(20),
        timestamp: chrono::Utc::now(),
        stages: Stage::initial_set(),
        report: None,
        pdf_path: None,
        paper_count: 0,
    }
}

// --- Stage progress properties ---

proptest! {
    #[test]
    fn progress_tracks_each_update(
        stage in 1u8..=7,
        updates in prop::collection::vec(0u8..=100, 1..40),
    ) {
        let mut store = started();
        for progress in updates {
            apply_event(&mut store, InboundEvent::StageUpdate {
                stage,
                progress: Some(f64::from(progress)),
                message: Some(format!("at {progress}")),
                data: None,
            });
            prop_assert_eq!(store.stage(stage).unwrap().progress, progress);
        }
    }

    #[test]
    fn progress_is_always_clamped(raw in prop::num::f64::ANY) {
        let mut store = started();
        apply_event(&mut store, InboundEvent::StageUpdate {
            stage: 1,
            progress: Some(raw),
            message: None,
            data: None,
        });
        prop_assert!(store.stage(1).unwrap().progress <= 100);
    }

    #[test]
    fn stage_history_keeps_latest_fifty_in_order(count in 1usize..150) {
        let mut store = started();
        for i in 0..count {
            store.update_stage(
                2,
                StagePatch::status(StageStatus::Running).with_message(format!("update {i}")),
            );
        }
        let stage = store.stage(2).unwrap();
        prop_assert_eq!(stage.history_len(), count.min(STAGE_HISTORY_LIMIT));

        let first_kept = count.saturating_sub(STAGE_HISTORY_LIMIT);
        let messages: Vec<String> = stage.history().map(|e| e.message.clone()).collect();
        let expected: Vec<String> = (first_kept..count).map(|i| format!("update {i}")).collect();
        prop_assert_eq!(messages, expected);
    }

    #[test]
    fn terminal_stages_never_change(
        terminal in prop_oneof![Just(StageStatus::Completed), Just(StageStatus::Error)],
        later in prop::collection::vec(
            prop_oneof![
                Just(StageStatus::Pending),
                Just(StageStatus::Running),
                Just(StageStatus::Completed),
                Just(StageStatus::Error),
            ],
            0..10,
        ),
    ) {
        let mut store = started();
        store.update_stage(5, StagePatch::status(terminal).with_progress(100));
        let frozen = store.stage(5).unwrap().clone();
        for status in later {
            prop_assert!(!store.update_stage(5, StagePatch::status(status).with_progress(1)));
        }
        prop_assert_eq!(store.stage(5).unwrap(), &frozen);
    }
}

// --- History ring properties ---

proptest! {
    #[test]
    fn history_ring_is_bounded_newest_first(bound in 1usize..20, inserts in 0usize..60) {
        let mut history = RunHistory::in_memory(bound);
        for i in 0..inserts {
            history.push(entry(i));
        }
        prop_assert_eq!(history.len(), inserts.min(bound));
        let ids: Vec<String> = history.entries().map(|e| e.id.clone()).collect();
        let expected: Vec<String> = (inserts.saturating_sub(bound)..inserts)
            .rev()
            .map(|i| format!("run-{i}"))
            .collect();
        prop_assert_eq!(ids, expected);
    }

    #[test]
    fn archive_then_reset_keeps_history(
        prior_runs in 0usize..12,
        papers in 0usize..5,
    ) {
        let mut store = RunStore::new(RunHistory::in_memory(10));
        for i in 0..prior_runs {
            store.start(format!("prior-{i}"), PipelineQuery::new(["nlp"], 20).unwrap());
            store.archive_current_run();
        }

        store.start("current", PipelineQuery::new(["graphs"], 10).unwrap());
        store.initialize_stages();
        store.set_result(ResultAggregate::Papers(Vec::with_capacity(papers)));
        store.set_artifact_path("/output/current/report.pdf");
        prop_assert!(store.archive_current_run());
        let history_before: Vec<RunHistoryEntry> = store.history().entries().cloned().collect();

        store.reset();

        let history_after: Vec<RunHistoryEntry> = store.history().entries().cloned().collect();
        prop_assert_eq!(history_after, history_before);
        prop_assert!(store.session_id().is_none());
        prop_assert!(store.query().is_none());
        prop_assert!(!store.is_running());
        prop_assert!(store.error().is_none());
        prop_assert!(store.stages().is_empty());
        prop_assert!(store.results().pdf_path.is_none());
        prop_assert_eq!(store.view(), View::Pipeline);
    }
}

#[test]
fn test_eleventh_insertion_evicts_exactly_the_oldest() {
    let mut history = RunHistory::in_memory(10);
    for i in 0..11 {
        history.push(entry(i));
    }
    assert_eq!(history.len(), 10);
    assert_eq!(history.get(0).unwrap().id, "run-10");
    assert!(history.entries().all(|e| e.id != "run-0"));
    assert!(history.entries().any(|e| e.id == "run-1"));
}

#[test]
fn test_empty_keywords_never_create_a_run() {
    for keywords in [vec![], vec!["".to_string()], vec!["   ".to_string(), "\t".to_string()]] {
        assert!(PipelineQuery::new(keywords, 20).is_err());
    }
}
