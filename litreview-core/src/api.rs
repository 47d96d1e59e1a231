//! REST client for the pipeline backend.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{ApiError, ConfigError};
use crate::types::PipelineQuery;

/// Response of `POST /api/pipeline/start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    pub session_id: String,
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket_url: Option<String>,
}

/// Coarse run status reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Running,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl PipelineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineStatus::Completed | PipelineStatus::Failed)
    }
}

/// Response of `GET /api/pipeline/status/{session_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: PipelineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// HTTP client for the pipeline endpoints.
#[derive(Debug, Clone)]
pub struct PipelineApi {
    client: reqwest::Client,
    base_url: Url,
}

impl PipelineApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url).map_err(|e| ConfigError::Invalid {
            message: format!("api_base_url '{base_url}': {e}"),
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("HTTP client: {e}"),
            })?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    /// Start a pipeline run.
    pub async fn start_pipeline(&self, query: &PipelineQuery) -> Result<StartResponse, ApiError> {
        let url = self.endpoint("/api/pipeline/start");
        debug!(url = %url, keywords = ?query.keywords, "Starting pipeline");
        let response = self
            .client
            .post(&url)
            .json(query)
            .send()
            .await
            .map_err(|e| request_error(&url, e))?;
        decode(&url, response).await
    }

    /// Poll the coarse status of a run.
    pub async fn pipeline_status(&self, session_id: &str) -> Result<StatusResponse, ApiError> {
        let url = self.endpoint(&format!("/api/pipeline/status/{session_id}"));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error(&url, e))?;
        decode(&url, response)
            .await
            .map_err(|e| session_error(e, session_id))
    }

    /// Fetch the final result of a finished run.
    pub async fn pipeline_result(&self, session_id: &str) -> Result<Value, ApiError> {
        let url = self.endpoint(&format!("/api/pipeline/result/{session_id}"));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error(&url, e))?;
        decode(&url, response)
            .await
            .map_err(|e| session_error(e, session_id))
    }

    /// Backend liveness probe.
    pub async fn health(&self) -> Result<Value, ApiError> {
        let url = self.endpoint("/health");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error(&url, e))?;
        decode(&url, response).await
    }
}

fn request_error(url: &str, err: reqwest::Error) -> ApiError {
    ApiError::Request {
        url: url.to_string(),
        message: err.to_string(),
    }
}

fn session_error(err: ApiError, session_id: &str) -> ApiError {
    match err {
        ApiError::Status { status: 404, .. } => {
            ApiError::SessionNotFound {
                session_id: session_id.to_string(),
            }
        }
        ApiError::Status { status: 425, .. } => {
            ApiError::StillRunning {
                session_id: session_id.to_string(),
            }
        }
        other => other,
    }
}

async fn decode<T: DeserializeOwned>(url: &str, response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().await.map_err(|e| request_error(url, e))?;
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            detail: error_detail(&body),
        });
    }
    serde_json::from_str(&body).map_err(|e| ApiError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}

/// Pull the FastAPI-style `detail` field out of an error body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| match v.get("detail") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        })
        .unwrap_or_else(|| body.trim().to_string())
}
