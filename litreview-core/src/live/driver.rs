//! The per-run driver task.
//!
//! One task owns the socket, every timer, and the poll loop for a single
//! session, so transitions happen strictly in sequence:
//!
//! ```text
//! Disconnected --delay--> Connecting --ok--> Connected --lost, running--> Polling --terminal--> Finished
//!      ^                      |                  |
//!      +------- failed -------+---- lost, idle --+
//! ```

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::ConnectionState;
use super::apply::{apply_event, apply_status};
use super::events::{InboundEvent, KEEPALIVE_FRAME, parse_event};
use crate::api::PipelineApi;
use crate::config::LiveConfig;
use crate::error::LiveError;
use crate::store::StoreHandle;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on the close handshake during deactivation.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// How a connected session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    /// The server closed the channel or the transport failed.
    Lost,
    /// No pipeline event arrived within the stall timeout while the run was running.
    Stalled,
}

pub(crate) struct Driver {
    pub(crate) session_id: String,
    pub(crate) url: Url,
    pub(crate) config: LiveConfig,
    pub(crate) api: PipelineApi,
    pub(crate) store: StoreHandle,
    pub(crate) state: Arc<watch::Sender<ConnectionState>>,
    pub(crate) cancel: CancellationToken,
}

impl Driver {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(session = %self.session_id, from = %previous, to = %next, "Live client transition");
        }
    }

    pub(crate) async fn run(self) {
        let mut delay: Option<Duration> = None;
        loop {
            if let Some(delay) = delay.take() {
                self.set_state(ConnectionState::Disconnected);
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            self.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = tokio_tungstenite::connect_async(self.url.as_str()) => result,
            };
            let socket = match connected {
                Ok((socket, _response)) => socket,
                Err(e) => {
                    let err = LiveError::Connect {
                        url: self.url.to_string(),
                        message: e.to_string(),
                    };
                    warn!(session = %self.session_id, error = %err, "Live channel connect failed");
                    delay = Some(self.config.reconnect_delay());
                    continue;
                }
            };

            info!(session = %self.session_id, "Live channel connected");
            self.set_state(ConnectionState::Connected);
            match self.session(socket).await {
                SessionEnd::Cancelled => return,
                SessionEnd::Stalled => {
                    warn!(session = %self.session_id, "Live channel stalled, polling for status");
                    self.poll().await;
                    return;
                }
                SessionEnd::Lost if self.store.is_running() => {
                    info!(session = %self.session_id, "Live channel lost mid-run, polling for status");
                    self.poll().await;
                    return;
                }
                SessionEnd::Lost => {
                    info!(session = %self.session_id, "Live channel closed");
                    delay = Some(self.config.reconnect_delay());
                }
            }
        }
    }

    async fn session(&self, mut socket: Socket) -> SessionEnd {
        let period = self.config.keepalive_interval();
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let stall_timeout = self.config.stall_timeout();
        let mut last_activity = Instant::now();

        loop {
            let stall_deadline = stall_timeout.map(|timeout| last_activity + timeout);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, socket.close(None)).await;
                    return SessionEnd::Cancelled;
                }
                _ = keepalive.tick() => {
                    if let Err(e) = socket.send(Message::Text(KEEPALIVE_FRAME.into())).await {
                        let err = transport_error(&e);
                        warn!(session = %self.session_id, error = %err, "Keep-alive send failed");
                        return SessionEnd::Lost;
                    }
                }
                _ = sleep_until(stall_deadline), if stall_deadline.is_some() => {
                    if self.store.is_running() {
                        return SessionEnd::Stalled;
                    }
                    last_activity = Instant::now();
                }
                frame = socket.next() => {
                    match frame {
                        None => return SessionEnd::Lost,
                        Some(Err(e)) => {
                            let err = transport_error(&e);
                            warn!(session = %self.session_id, error = %err, "Live channel transport error");
                            return SessionEnd::Lost;
                        }
                        Some(Ok(Message::Text(text))) => {
                            // Keep-alive replies must not hold off stall detection.
                            if self.handle_text(text.as_str()) {
                                last_activity = Instant::now();
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(session = %self.session_id, ?frame, "Server closed live channel");
                            return SessionEnd::Lost;
                        }
                        // Binary frames carry nothing for this client; control
                        // frames are answered by the transport.
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    /// Apply one text frame. Returns `true` when it carried pipeline activity.
    fn handle_text(&self, text: &str) -> bool {
        match parse_event(text) {
            Ok(InboundEvent::Unknown) => {
                warn!(session = %self.session_id, frame = %truncate(text), "Dropping event with unknown type");
                false
            }
            Ok(event) => {
                debug!(session = %self.session_id, kind = event.kind(), "Live event");
                let activity = event.is_pipeline_activity();
                self.store.update(|store| apply_event(store, event));
                activity
            }
            Err(e) => {
                warn!(session = %self.session_id, error = %e, frame = %truncate(text), "Dropping malformed frame");
                false
            }
        }
    }

    /// Poll the status endpoint until the run reaches a terminal status.
    /// Requests are issued one at a time from this loop.
    async fn poll(&self) {
        self.set_state(ConnectionState::Polling);
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let response = tokio::select! {
                _ = self.cancel.cancelled() => return,
                response = self.api.pipeline_status(&self.session_id) => response,
            };
            match response {
                Ok(status) => {
                    let status_kind = status.status;
                    if self.store.update(|store| apply_status(store, status)) {
                        info!(session = %self.session_id, status = ?status_kind, "Run resolved by status poll");
                        self.set_state(ConnectionState::Finished);
                        return;
                    }
                    debug!(session = %self.session_id, status = ?status_kind, "Run still in progress");
                }
                Err(e) => {
                    warn!(session = %self.session_id, error = %e, "Status poll failed");
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn transport_error(e: &tokio_tungstenite::tungstenite::Error) -> LiveError {
    LiveError::Transport {
        message: e.to_string(),
    }
}

fn truncate(text: &str) -> &str {
    const LIMIT: usize = 200;
    match text.char_indices().nth(LIMIT) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
