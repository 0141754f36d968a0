//! Client end of the push channel: reads the SSE stream, feeds the ordered
//! dispatcher and reconnects after a randomized delay.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use wallette_shared::constants::SIGNALING_EVENTS_PATH;
use wallette_shared::protocol::SignalingEvent;

use crate::config::ClientConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::TransportError;
use crate::sse::SseParser;

/// Connectivity of the push channel, for components that pause sending
/// during an outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
    Disconnected,
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectivityState::Connecting => "connecting",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Reconnecting => "reconnecting",
            ConnectivityState::Disconnecting => "disconnecting",
            ConnectivityState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

pub struct PushChannel {
    state: watch::Receiver<ConnectivityState>,
    state_tx: Arc<watch::Sender<ConnectivityState>>,
    task: JoinHandle<()>,
}

impl PushChannel {
    /// Start reading events in the background. The dispatcher's `run` loop
    /// must be driven separately.
    pub fn spawn(
        http: reqwest::Client,
        config: Arc<ClientConfig>,
        dispatcher: EventDispatcher,
    ) -> Self {
        let (state_tx, state) = watch::channel(ConnectivityState::Connecting);
        let state_tx = Arc::new(state_tx);
        let task = tokio::spawn(push_loop(http, config, dispatcher, state_tx.clone()));
        Self {
            state,
            state_tx,
            task,
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectivityState> {
        self.state.clone()
    }

    pub async fn close(self) {
        self.state_tx.send_replace(ConnectivityState::Disconnecting);
        self.task.abort();
        let _ = self.task.await;
        self.state_tx.send_replace(ConnectivityState::Disconnected);
        info!("Push channel closed");
    }
}

/// Uniform in `[0, max]`.
pub fn reconnect_delay(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

async fn push_loop(
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    dispatcher: EventDispatcher,
    state_tx: Arc<watch::Sender<ConnectivityState>>,
) {
    let mut attempt: u32 = 0;
    loop {
        match read_stream(&http, &config, &dispatcher, &state_tx).await {
            Ok(()) => info!("Push channel ended by server"),
            Err(e) => warn!(error = %e, attempt, "Push channel failed"),
        }

        attempt = attempt.saturating_add(1);
        state_tx.send_replace(ConnectivityState::Reconnecting);
        let delay = reconnect_delay(config.max_reconnect_backoff);
        debug!(delay_ms = delay.as_millis() as u64, attempt, "Reconnecting push channel");
        tokio::time::sleep(delay).await;
    }
}

async fn read_stream(
    http: &reqwest::Client,
    config: &ClientConfig,
    dispatcher: &EventDispatcher,
    state_tx: &watch::Sender<ConnectivityState>,
) -> Result<(), TransportError> {
    let response = http
        .get(config.url(SIGNALING_EVENTS_PATH))
        .header(config.identity_header.as_str(), config.identity.as_str())
        .header("accept", "text/event-stream")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Status {
            status: status.as_u16(),
            body,
        });
    }

    state_tx.send_replace(ConnectivityState::Connected);
    info!(identity = %config.identity, "Push channel connected");

    let mut parser = SseParser::default();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk: bytes::Bytes = chunk?;
        for data in parser.feed(&chunk) {
            match SignalingEvent::from_json(&data) {
                Ok(event) => {
                    debug!(kind = event.kind(), "Push event received");
                    dispatcher.push(event);
                }
                Err(e) => warn!(error = %e, "Dropping unrecognised push event"),
            }
        }
    }

    Ok(())
}
