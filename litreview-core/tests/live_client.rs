//! Integration tests for the live update client and the pipeline controller
//! against an in-process mock backend.
//!
//! The mock serves the start, status, and result endpoints plus the live
//! channel. Each test scripts the frames pushed on the channel and the
//! sequence of status responses.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde_json::{Value, json};
use tokio::sync::watch;

use litreview_core::{
    ApiError, ConnectionState, LitReviewError, LiveConfig, LiveUpdateClient, PipelineApi,
    PipelineController, PipelineQuery, RunHistory, RunStore, StageStatus, StoreHandle, View,
};

// --- Mock backend ---

#[derive(Clone, Default)]
struct Mock {
    /// Frames pushed right after the channel opens.
    frames: Arc<Vec<WsMessage>>,
    /// Keep the channel open after the scripted frames instead of closing it.
    hold_open: bool,
    /// Status responses in order; the last one repeats.
    statuses: Arc<Mutex<VecDeque<Value>>>,
    polls: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
    starts: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<String>>>,
    client_closed: Arc<AtomicBool>,
}

impl Mock {
    fn new(frames: Vec<Value>, hold_open: bool) -> Self {
        Self {
            frames: Arc::new(
                frames
                    .into_iter()
                    .map(|f| WsMessage::Text(f.to_string().into()))
                    .collect(),
            ),
            hold_open,
            ..Self::default()
        }
    }

    fn with_raw_frames(frames: Vec<WsMessage>, hold_open: bool) -> Self {
        Self {
            frames: Arc::new(frames),
            hold_open,
            ..Self::default()
        }
    }

    fn with_statuses(self, statuses: Vec<Value>) -> Self {
        *self.statuses.lock().unwrap() = statuses.into();
        self
    }

    fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(_session_id): Path<String>,
    State(mock): State<Mock>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_channel(socket, mock))
}

async fn serve_channel(mut socket: WebSocket, mock: Mock) {
    mock.connects.fetch_add(1, Ordering::SeqCst);
    for frame in mock.frames.iter() {
        if socket.send(frame.clone()).await.is_err() {
            return;
        }
    }
    if !mock.hold_open {
        let _ = socket.send(WsMessage::Close(None)).await;
        return;
    }
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            WsMessage::Text(text) => {
                let text = text.to_string();
                if text == "ping" {
                    let _ = socket
                        .send(WsMessage::Text(json!({"type": "pong"}).to_string().into()))
                        .await;
                }
                mock.received.lock().unwrap().push(text);
            }
            WsMessage::Close(_) => {
                mock.client_closed.store(true, Ordering::SeqCst);
                break;
            }
            _ => {}
        }
    }
}

async fn status_handler(Path(_session_id): Path<String>, State(mock): State<Mock>) -> Json<Value> {
    mock.polls.fetch_add(1, Ordering::SeqCst);
    let mut statuses = mock.statuses.lock().unwrap();
    let body = if statuses.len() > 1 {
        statuses.pop_front().unwrap_or_default()
    } else {
        statuses
            .front()
            .cloned()
            .unwrap_or_else(|| json!({"status": "running", "result": null}))
    };
    Json(body)
}

async fn start_handler(State(mock): State<Mock>, Json(body): Json<Value>) -> Json<Value> {
    mock.starts.fetch_add(1, Ordering::SeqCst);
    assert!(body["keywords"].is_array());
    let session_id = uuid::Uuid::new_v4().to_string();
    Json(json!({
        "session_id": session_id,
        "status": "started",
        "message": "Pipeline started successfully",
        "websocket_url": format!("/ws/{session_id}"),
    }))
}

async fn result_handler(Path(session_id): Path<String>) -> impl IntoResponse {
    match session_id.as_str() {
        "still-running" => (
            StatusCode::from_u16(425).unwrap(),
            Json(json!({"detail": "Pipeline still running"})),
        ),
        "done" => (
            StatusCode::OK,
            Json(json!({"report": {"query": "nlp"}, "pdf_path": "/output/done/report.pdf"})),
        ),
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Pipeline session not found"})),
        ),
    }
}

async fn spawn_backend(mock: Mock) -> SocketAddr {
    let app = Router::new()
        .route("/ws/{session_id}", get(ws_handler))
        .route("/api/pipeline/start", post(start_handler))
        .route("/api/pipeline/status/{session_id}", get(status_handler))
        .route("/api/pipeline/result/{session_id}", get(result_handler))
        .route("/health", get(|| async { Json(json!({"status": "healthy"})) }))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

// --- Helpers ---

fn fast_config() -> LiveConfig {
    LiveConfig {
        reconnect_delay_ms: 50,
        keepalive_interval_ms: 1_000,
        poll_interval_ms: 50,
        stall_timeout_ms: 0,
    }
}

fn controller(addr: SocketAddr, config: LiveConfig) -> PipelineController {
    let api = PipelineApi::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
    let store = StoreHandle::new(RunStore::new(RunHistory::in_memory(10)));
    let live = LiveUpdateClient::new(format!("ws://{addr}"), config, api.clone(), store.clone());
    PipelineController::new(api, store, live)
}

/// A live client following a run that was started on the store directly.
async fn follow(
    addr: SocketAddr,
    config: LiveConfig,
    running: bool,
) -> (LiveUpdateClient, StoreHandle) {
    let api = PipelineApi::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
    let store = StoreHandle::new(RunStore::new(RunHistory::in_memory(10)));
    if running {
        store.update(|s| {
            s.start("session-1", PipelineQuery::new(["nlp"], 20).unwrap());
            s.initialize_stages();
        });
    }
    let mut client = LiveUpdateClient::new(format!("ws://{addr}"), config, api, store.clone());
    client.activate("session-1").await.unwrap();
    (client, store)
}

async fn eventually(store: &StoreHandle, predicate: impl Fn(&RunStore) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), store.wait_for(predicate))
        .await
        .expect("store never reached the expected state");
}

async fn wait_for_state(mut rx: watch::Receiver<ConnectionState>, target: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == target))
        .await
        .expect("client never reached the expected state")
        .expect("state channel closed");
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

fn papers(n: usize) -> Value {
    Value::Array(
        (0..n)
            .map(|i| json!({"paper_id": format!("p{i}"), "title": format!("Paper {i}"), "citation_count": i}))
            .collect(),
    )
}

// --- Event flow ---

#[tokio::test]
async fn test_submit_tracks_stage_progress_and_papers() {
    let mock = Mock::new(
        vec![
            json!({"type": "connected", "session_id": "x"}),
            json!({"type": "stage_update", "stage": 1, "progress": 40, "message": "Fetched 5 papers"}),
            json!({"type": "stage_complete", "stage": 1, "data": {"papers": papers(12)}}),
        ],
        true,
    );
    let addr = spawn_backend(mock.clone()).await;
    let mut controller = controller(addr, fast_config());

    let started = controller.submit(["nlp"], 20).await.unwrap();
    assert_eq!(mock.starts.load(Ordering::SeqCst), 1);

    let store = controller.store().clone();
    eventually(&store, |s| s.results().paper_count() == 12).await;

    store.read(|s| {
        assert_eq!(s.session_id(), Some(started.session_id.as_str()));
        let stage = s.stage(1).unwrap();
        assert_eq!(stage.status, StageStatus::Completed);
        assert_eq!(stage.progress, 100);
        let progress: Vec<u8> = stage.history().map(|e| e.progress).collect();
        assert_eq!(progress, vec![40, 100]);
        assert!(s.is_running());
    });
    assert_eq!(controller.connection_state(), ConnectionState::Connected);
    controller.new_search().await;
}

#[tokio::test]
async fn test_final_stage_archives_once_and_shows_results() {
    let complete = json!({
        "type": "stage_complete",
        "stage": 7,
        "result": {"pdf_path": "/output/s/report.pdf"},
    });
    let mock = Mock::new(vec![complete.clone(), complete], true);
    let addr = spawn_backend(mock).await;
    let mut controller = controller(addr, fast_config());
    controller.submit(["graph neural networks"], 30).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), controller.wait_until_settled())
        .await
        .unwrap();
    // Let the replayed frame arrive as well.
    let store = controller.store().clone();
    eventually(&store, |s| s.stage(7).is_some_and(|st| st.history_len() == 1)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    store.read(|s| {
        assert_eq!(s.view(), View::Results);
        assert_eq!(s.history().len(), 1);
        let entry = s.history().get(0).unwrap();
        assert_eq!(entry.query, "graph neural networks");
        assert_eq!(entry.pdf_path.as_deref(), Some("/output/s/report.pdf"));
    });
    controller.new_search().await;
}

#[tokio::test]
async fn test_error_event_fails_stage_and_run() {
    let mock = Mock::new(
        vec![
            json!({"type": "stage_update", "stage": 3, "progress": 10}),
            json!({"type": "error", "stage": 3, "error": "Clustering failed"}),
        ],
        true,
    );
    let addr = spawn_backend(mock).await;
    let mut controller = controller(addr, fast_config());
    controller.submit(["nlp"], 20).await.unwrap();

    let store = controller.store().clone();
    eventually(&store, |s| !s.is_running()).await;
    store.read(|s| {
        assert_eq!(s.stage(3).unwrap().status, StageStatus::Error);
        assert_eq!(s.error(), Some("Clustering failed"));
        assert_eq!(s.view(), View::Pipeline);
    });
    controller.new_search().await;
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let mock = Mock::with_raw_frames(
        vec![
            WsMessage::Text("not json at all".into()),
            WsMessage::Text(json!({"type": "mystery", "stage": 1}).to_string().into()),
            WsMessage::Text(json!({"type": "stage_update"}).to_string().into()),
            WsMessage::Binary(vec![0u8, 1, 2].into()),
            WsMessage::Text(
                json!({"type": "stage_update", "stage": 2, "progress": 30})
                    .to_string()
                    .into(),
            ),
        ],
        true,
    );
    let addr = spawn_backend(mock).await;
    let (mut client, store) = follow(addr, fast_config(), true).await;

    eventually(&store, |s| s.stage(2).is_some_and(|st| st.progress == 30)).await;
    store.read(|s| {
        assert!(s.error().is_none());
        assert!(s.is_running());
        assert_eq!(s.stage(1).unwrap().history_len(), 0);
    });
    assert_eq!(client.state(), ConnectionState::Connected);
    client.deactivate().await;
}

#[tokio::test]
async fn test_submit_rejects_empty_keywords_without_request() {
    let mock = Mock::new(vec![], true);
    let addr = spawn_backend(mock.clone()).await;
    let mut controller = controller(addr, fast_config());

    let err = controller.submit(["", "   "], 20).await.unwrap_err();
    assert!(matches!(err, LitReviewError::Validation(_)));
    let err = controller.submit(["nlp"], 0).await.unwrap_err();
    assert!(matches!(err, LitReviewError::Validation(_)));

    assert_eq!(mock.starts.load(Ordering::SeqCst), 0);
    assert!(controller.store().read(|s| s.session_id().is_none()));
    assert!(!controller.live().is_active());
}

// --- Reconnect and fallback polling ---

#[tokio::test]
async fn test_channel_loss_mid_run_falls_back_to_polling() {
    let mock = Mock::new(
        vec![json!({"type": "stage_update", "stage": 1, "progress": 40})],
        false,
    )
    .with_statuses(vec![
        json!({"status": "running", "result": null}),
        json!({
            "status": "completed",
            "result": {
                "report": {"query": "nlp", "total_papers": 12, "synthesis": "Done."},
                "pdf_path": "/output/session-1/report.pdf",
            },
        }),
    ]);
    let addr = spawn_backend(mock.clone()).await;
    let (mut client, store) = follow(addr, fast_config(), true).await;

    wait_for_state(client.subscribe_state(), ConnectionState::Finished).await;
    store.read(|s| {
        assert_eq!(s.results().report.as_ref().unwrap().total_papers, 12);
        assert_eq!(
            s.results().pdf_path.as_deref(),
            Some("/output/session-1/report.pdf")
        );
        assert!(!s.is_running());
        assert_eq!(s.view(), View::Results);
        assert_eq!(s.history().len(), 1);
    });

    let polls = mock.polls();
    assert!(polls >= 2);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(mock.polls(), polls, "polling continued after a terminal status");
    assert_eq!(mock.connects(), 1, "client reconnected after polling resolved");
    client.deactivate().await;
}

#[tokio::test]
async fn test_failed_poll_sets_run_error() {
    let mock = Mock::new(vec![], false)
        .with_statuses(vec![json!({"status": "failed", "error": "Backend crashed"})]);
    let addr = spawn_backend(mock).await;
    let (mut client, store) = follow(addr, fast_config(), true).await;

    wait_for_state(client.subscribe_state(), ConnectionState::Finished).await;
    assert_eq!(
        store.read(|s| s.error().map(str::to_string)),
        Some("Backend crashed".to_string())
    );
    client.deactivate().await;
}

#[tokio::test]
async fn test_closed_channel_without_running_run_reconnects() {
    let mock = Mock::new(vec![json!({"type": "connected"})], false);
    let addr = spawn_backend(mock.clone()).await;
    let (mut client, _store) = follow(addr, fast_config(), false).await;

    wait_until(|| mock.connects() >= 3).await;
    assert_eq!(mock.polls(), 0);
    client.deactivate().await;
}

#[tokio::test]
async fn test_stalled_channel_falls_back_to_polling() {
    let mock = Mock::new(vec![json!({"type": "connected"})], true)
        .with_statuses(vec![json!({"status": "completed", "result": null})]);
    let addr = spawn_backend(mock.clone()).await;
    let config = LiveConfig {
        stall_timeout_ms: 150,
        ..fast_config()
    };
    let (mut client, store) = follow(addr, config, true).await;

    wait_for_state(client.subscribe_state(), ConnectionState::Finished).await;
    assert!(mock.polls() >= 1);
    store.read(|s| {
        assert!(!s.is_running());
        assert!(s.results().pdf_path.is_none());
        assert_eq!(s.view(), View::Results);
    });
    client.deactivate().await;
}

#[tokio::test]
async fn test_keepalive_replies_do_not_hold_off_stall_detection() {
    let mock = Mock::new(
        vec![json!({"type": "stage_update", "stage": 1, "progress": 10})],
        true,
    )
    .with_statuses(vec![json!({"status": "completed", "result": null})]);
    let addr = spawn_backend(mock.clone()).await;
    let config = LiveConfig {
        keepalive_interval_ms: 50,
        stall_timeout_ms: 300,
        ..fast_config()
    };
    let (mut client, store) = follow(addr, config, true).await;

    wait_for_state(client.subscribe_state(), ConnectionState::Finished).await;
    assert!(mock.received().iter().any(|m| m == "ping"));
    assert!(mock.polls() >= 1);
    store.read(|s| {
        assert!(!s.is_running());
        assert_eq!(s.view(), View::Results);
    });
    client.deactivate().await;
}

#[tokio::test]
async fn test_keepalive_pings_are_sent() {
    let mock = Mock::new(vec![], true);
    let addr = spawn_backend(mock.clone()).await;
    let config = LiveConfig {
        keepalive_interval_ms: 50,
        ..fast_config()
    };
    let (mut client, _store) = follow(addr, config, true).await;

    wait_until(|| mock.received().iter().filter(|m| *m == "ping").count() >= 2).await;
    assert_eq!(client.state(), ConnectionState::Connected);
    client.deactivate().await;
}

#[tokio::test]
async fn test_deactivation_stops_all_traffic() {
    let mock = Mock::new(vec![json!({"type": "connected"})], true);
    let addr = spawn_backend(mock.clone()).await;
    let config = LiveConfig {
        keepalive_interval_ms: 50,
        ..fast_config()
    };
    let (mut client, _store) = follow(addr, config, true).await;
    wait_for_state(client.subscribe_state(), ConnectionState::Connected).await;

    client.deactivate().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    wait_until(|| mock.client_closed.load(Ordering::SeqCst)).await;

    let connects = mock.connects();
    let received = mock.received().len();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(mock.connects(), connects);
    assert_eq!(mock.received().len(), received);
    assert_eq!(mock.polls(), 0);
}

#[tokio::test]
async fn test_new_search_resets_store_and_stops_client() {
    let mock = Mock::new(
        vec![json!({"type": "stage_update", "stage": 1, "progress": 5})],
        true,
    );
    let addr = spawn_backend(mock.clone()).await;
    let mut controller = controller(addr, fast_config());
    controller.submit(["nlp"], 20).await.unwrap();
    let store = controller.store().clone();
    eventually(&store, |s| s.stage(1).is_some_and(|st| st.progress == 5)).await;

    controller.new_search().await;
    assert!(!controller.live().is_active());
    store.read(|s| {
        assert!(s.session_id().is_none());
        assert!(s.stages().is_empty());
    });
    let connects = mock.connects();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(mock.connects(), connects);
}

// --- REST client ---

#[tokio::test]
async fn test_api_maps_result_statuses() {
    let addr = spawn_backend(Mock::default()).await;
    let api = PipelineApi::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();

    assert!(matches!(
        api.pipeline_result("still-running").await,
        Err(ApiError::StillRunning { .. })
    ));
    assert!(matches!(
        api.pipeline_result("missing").await,
        Err(ApiError::SessionNotFound { .. })
    ));
    let done = api.pipeline_result("done").await.unwrap();
    assert_eq!(done["pdf_path"], "/output/done/report.pdf");

    let health = api.health().await.unwrap();
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_api_request_failure_is_reported() {
    // Nothing listens on the discard port.
    let api = PipelineApi::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
    assert!(matches!(
        api.pipeline_status("s-1").await,
        Err(ApiError::Request { .. })
    ));
}
