//! # LitReview Core
//!
//! Real-time state synchronization for the literature-review pipeline
//! dashboard. Provides the run state store, the live update client with its
//! reconnect and fallback-poll logic, the REST client for the pipeline
//! backend, configuration, and history persistence.

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod live;
pub mod persistence;
pub mod store;
pub mod types;

// Re-export commonly used types at the crate root.
pub use api::{PipelineApi, PipelineStatus, StartResponse, StatusResponse};
pub use config::{BackendConfig, DashboardConfig, HistoryConfig, LiveConfig, load_config};
pub use controller::PipelineController;
pub use error::{ApiError, ConfigError, LitReviewError, LiveError, Result, ValidationError};
pub use live::{ConnectionState, InboundEvent, LiveUpdateClient, apply_event, apply_status};
pub use store::{
    PipelineSummary, ResultAggregate, ResultAggregates, RunHistory, RunHistoryEntry, RunStore,
    Stage, StagePatch, StoreHandle,
};
pub use types::{
    LiteratureReviewReport, Paper, PaperSort, PipelineQuery, ResultTab, StageStatus, View,
};
