//! The submit / new-search actions tying the API, store, and live client together.

use tracing::{info, warn};

use crate::api::{PipelineApi, StartResponse};
use crate::config::DashboardConfig;
use crate::error::{LitReviewError, Result};
use crate::live::{ConnectionState, LiveUpdateClient};
use crate::store::{RunHistory, RunStore, StoreHandle};
use crate::types::PipelineQuery;

/// Drives one dashboard session: at most one run is followed at a time.
pub struct PipelineController {
    api: PipelineApi,
    store: StoreHandle,
    live: LiveUpdateClient,
}

impl PipelineController {
    pub fn new(api: PipelineApi, store: StoreHandle, live: LiveUpdateClient) -> Self {
        Self { api, store, live }
    }

    /// Build the API client, the store (with persisted history), and the
    /// live client from configuration.
    pub fn from_config(config: &DashboardConfig) -> Result<Self> {
        config.validate()?;
        let api = PipelineApi::new(
            &config.backend.api_base_url,
            config.backend.request_timeout(),
        )?;
        let history = match config.history.resolved_path() {
            Some(path) => RunHistory::load(path, config.history.max_history_size),
            None => {
                warn!("No data directory available; run history will not be persisted");
                RunHistory::in_memory(config.history.max_history_size)
            }
        };
        let store = StoreHandle::new(RunStore::new(history));
        let live = LiveUpdateClient::new(
            config.backend.ws_base_url.clone(),
            config.live.clone(),
            api.clone(),
            store.clone(),
        );
        Ok(Self::new(api, store, live))
    }

    pub fn api(&self) -> &PipelineApi {
        &self.api
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn live(&self) -> &LiveUpdateClient {
        &self.live
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.live.state()
    }

    /// Validate the query, start a run, and begin following it.
    ///
    /// Invalid input fails before any request is made or any state changes.
    /// If the start call fails the store is left reset with no run.
    pub async fn submit<I, S>(&mut self, keywords: I, max_papers: u32) -> Result<StartResponse>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let query = PipelineQuery::new(keywords, max_papers)?;

        self.live.deactivate().await;
        self.store.update(RunStore::reset);

        let response = self.api.start_pipeline(&query).await?;
        info!(session = %response.session_id, status = %response.status, "Pipeline started");

        self.store.update(|store| {
            store.start(response.session_id.clone(), query);
            store.initialize_stages();
        });
        if let Err(e) = self.live.activate(&response.session_id).await {
            self.store
                .update(|store| store.set_error(format!("Live updates unavailable: {e}")));
            return Err(LitReviewError::Live(e));
        }
        Ok(response)
    }

    /// Stop following the current run and clear live state. History stays.
    pub async fn new_search(&mut self) {
        self.live.deactivate().await;
        self.store.update(RunStore::reset);
    }

    /// Resolves once the current run stopped running: artifact produced,
    /// run failed, or finished without an artifact.
    pub async fn wait_until_settled(&self) {
        self.store.wait_for(|store| !store.is_running()).await;
    }

    /// Stop the live client without touching the store.
    pub async fn shutdown(&mut self) {
        self.live.deactivate().await;
    }
}
