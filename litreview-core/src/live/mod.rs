//! # Live Update Client
//!
//! Keeps one live channel open for the active run and feeds its events into
//! the [`StoreHandle`]. When the channel drops while the run is still
//! running, the client switches to polling the status endpoint until the
//! backend reports a terminal status. Otherwise it reconnects after a fixed
//! delay.
//!
//! All connection work happens in a single driver task per run. Activating
//! another run, deactivating, or dropping the client cancels that task.

mod apply;
mod driver;
mod events;

pub use apply::{apply_event, apply_status};
pub use events::{InboundEvent, KEEPALIVE_FRAME, parse_event, progress_percent};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::api::PipelineApi;
use crate::config::LiveConfig;
use crate::error::LiveError;
use crate::store::StoreHandle;
use driver::Driver;

/// Connection state of the live client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No channel open. Either nothing is active or a reconnect is pending.
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Channel lost mid-run; the status endpoint is being polled.
    Polling,
    /// Polling saw a terminal status. Nothing else will be attempted.
    Finished,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Polling => write!(f, "polling"),
            ConnectionState::Finished => write!(f, "finished"),
        }
    }
}

struct ActiveRun {
    session_id: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Live update client bound to one store.
pub struct LiveUpdateClient {
    ws_base_url: String,
    config: LiveConfig,
    api: PipelineApi,
    store: StoreHandle,
    state: Arc<watch::Sender<ConnectionState>>,
    active: Option<ActiveRun>,
}

impl LiveUpdateClient {
    pub fn new(
        ws_base_url: impl Into<String>,
        config: LiveConfig,
        api: PipelineApi,
        store: StoreHandle,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            ws_base_url: ws_base_url.into(),
            config,
            api,
            store,
            state: Arc::new(state),
            active: None,
        }
    }

    /// `<ws_base>/ws/<session_id>`, with the id percent-encoded as one segment.
    pub fn channel_url(&self, session_id: &str) -> Result<Url, LiveError> {
        let invalid = || LiveError::InvalidUrl {
            url: self.ws_base_url.clone(),
        };
        let mut url = Url::parse(&self.ws_base_url).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(invalid());
        }
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .push("ws")
            .push(session_id);
        Ok(url)
    }

    /// Start following `session_id`. A run that is already active is left
    /// alone; any other active run is deactivated first.
    pub async fn activate(&mut self, session_id: &str) -> Result<(), LiveError> {
        if self.session_id() == Some(session_id) {
            debug!(session = %session_id, "Run already active");
            return Ok(());
        }
        let url = self.channel_url(session_id)?;
        self.deactivate().await;

        info!(session = %session_id, url = %url, "Activating live updates");
        let cancel = CancellationToken::new();
        let driver = Driver {
            session_id: session_id.to_string(),
            url,
            config: self.config.clone(),
            api: self.api.clone(),
            store: self.store.clone(),
            state: Arc::clone(&self.state),
            cancel: cancel.clone(),
        };
        self.active = Some(ActiveRun {
            session_id: session_id.to_string(),
            cancel,
            task: tokio::spawn(driver.run()),
        });
        Ok(())
    }

    /// Stop following the active run. Resolves once the driver task has
    /// closed its socket and exited.
    pub async fn deactivate(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        info!(session = %active.session_id, "Deactivating live updates");
        active.cancel.cancel();
        if let Err(e) = active.task.await {
            debug!(session = %active.session_id, error = %e, "Driver task ended abnormally");
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    pub fn session_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.session_id.as_str())
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

impl Drop for LiveUpdateClient {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
    }
}
