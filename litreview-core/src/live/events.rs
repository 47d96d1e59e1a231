//! Wire format of the live channel.
//!
//! Inbound frames are JSON objects discriminated by `type`. The only
//! outbound frame is the plain-text keep-alive.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LiveError;

/// Text frame sent on every keep-alive tick.
pub const KEEPALIVE_FRAME: &str = "ping";

/// Events pushed by the backend for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Sent once after the channel is accepted.
    Connected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Intermediate progress of a running stage.
    StageUpdate {
        stage: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    /// A stage finished; `data` may carry a result aggregate.
    StageComplete {
        stage: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    /// The run (and optionally one stage) failed.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Reply to a keep-alive.
    Pong,
    /// Any `type` this client does not know.
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Connected { .. } => "connected",
            InboundEvent::StageUpdate { .. } => "stage_update",
            InboundEvent::StageComplete { .. } => "stage_complete",
            InboundEvent::Error { .. } => "error",
            InboundEvent::Pong => "pong",
            InboundEvent::Unknown => "unknown",
        }
    }

    /// Whether the event reports pipeline activity. Keep-alive replies and
    /// unrecognized types do not.
    pub fn is_pipeline_activity(&self) -> bool {
        !matches!(self, InboundEvent::Pong | InboundEvent::Unknown)
    }
}

/// Decode one text frame.
pub fn parse_event(text: &str) -> Result<InboundEvent, LiveError> {
    serde_json::from_str(text).map_err(|e| LiveError::MalformedEvent {
        message: e.to_string(),
    })
}

/// Convert a wire progress value into a percentage.
///
/// Missing and non-finite values become 0; everything else is rounded and
/// clamped into `0..=100`.
pub fn progress_percent(progress: Option<f64>) -> u8 {
    match progress {
        Some(p) if p.is_finite() => p.round().clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}
