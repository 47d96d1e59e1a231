//! Configuration system for the LitReview client.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/litreview/config.toml` and/or
//! `.litreview/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::persistence;
use crate::store::DEFAULT_MAX_HISTORY;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub backend: BackendConfig,
    pub live: LiveConfig,
    pub history: HistoryConfig,
}

/// Where the pipeline backend lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the REST API.
    pub api_base_url: String,
    /// Base URL of the WebSocket endpoint; `/ws/{session_id}` is appended.
    pub ws_base_url: String,
    /// Timeout applied to every REST request, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            ws_base_url: "ws://localhost:8000".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Timers of the live update client, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Delay before reconnecting after the channel closed on a finished run.
    pub reconnect_delay_ms: u64,
    /// Interval between keep-alive pings while connected.
    pub keepalive_interval_ms: u64,
    /// Interval between fallback status polls.
    pub poll_interval_ms: u64,
    /// Silence on an open channel, while the run is running, after which
    /// the client falls back to polling. 0 disables the check.
    pub stall_timeout_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 2_000,
            keepalive_interval_ms: 30_000,
            poll_interval_ms: 3_000,
            stall_timeout_ms: 120_000,
        }
    }
}

impl LiveConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stall_timeout(&self) -> Option<Duration> {
        (self.stall_timeout_ms > 0).then(|| Duration::from_millis(self.stall_timeout_ms))
    }
}

/// Persisted run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub max_history_size: usize,
    /// Overrides the default record location under the platform data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history_size: DEFAULT_MAX_HISTORY,
            path: None,
        }
    }
}

impl HistoryConfig {
    /// The configured record path, or the platform default.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(persistence::default_history_path)
    }
}

impl DashboardConfig {
    /// Reject settings the client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_scheme("backend.api_base_url", &self.backend.api_base_url, &["http", "https"])?;
        check_scheme("backend.ws_base_url", &self.backend.ws_base_url, &["ws", "wss"])?;

        let nonzero = [
            ("backend.request_timeout_secs", self.backend.request_timeout_secs),
            ("live.reconnect_delay_ms", self.live.reconnect_delay_ms),
            ("live.keepalive_interval_ms", self.live.keepalive_interval_ms),
            ("live.poll_interval_ms", self.live.poll_interval_ms),
            ("history.max_history_size", self.history.max_history_size as u64),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    message: format!("{field} must be greater than zero"),
                });
            }
        }
        Ok(())
    }
}

fn check_scheme(field: &str, value: &str, allowed: &[&str]) -> Result<(), ConfigError> {
    let url = url::Url::parse(value).map_err(|e| ConfigError::Invalid {
        message: format!("{field} '{value}': {e}"),
    })?;
    if !allowed.contains(&url.scheme()) {
        return Err(ConfigError::Invalid {
            message: format!("{field} must use one of {allowed:?}, got '{}'", url.scheme()),
        });
    }
    Ok(())
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `LITREVIEW_`)
/// 3. Workspace-local config (`.litreview/config.toml`)
/// 4. User config (`~/.config/litreview/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&DashboardConfig>,
) -> Result<DashboardConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(DashboardConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "litreview", "litreview") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".litreview").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // LITREVIEW_BACKEND__API_BASE_URL, LITREVIEW_LIVE__POLL_INTERVAL_MS, ...
    figment = figment.merge(Env::prefixed("LITREVIEW_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: DashboardConfig = figment.extract().map_err(|e| ConfigError::Load {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}
