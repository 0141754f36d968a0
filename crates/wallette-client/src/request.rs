use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use wallette_shared::constants::SIGNALING_REQUEST_PATH;
use wallette_shared::protocol::{
    EncodedEnvelope, EnterPoolRequest, MatchCriteria, NegotiationRequest, SignalingRequest,
    UpdateMatchCriteriaRequest,
};
use wallette_shared::Identity;

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::push::ConnectivityState;

/// Where a chat session sends its sealed envelopes.
#[async_trait]
pub trait NegotiationSink: Send + Sync {
    async fn forward_negotiation(
        &self,
        recipient: &Identity,
        envelope: EncodedEnvelope,
    ) -> Result<(), TransportError>;
}

/// Sends signaling requests for the configured wallet.
///
/// Requests are refused while the push channel is not connected: the server
/// answers through that channel, and a peer's negotiation would be lost.
#[derive(Clone)]
pub struct SignalingClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    connectivity: watch::Receiver<ConnectivityState>,
}

impl SignalingClient {
    /// `connectivity` is usually [`crate::push::PushChannel::state`].
    pub fn new(
        http: reqwest::Client,
        config: Arc<ClientConfig>,
        connectivity: watch::Receiver<ConnectivityState>,
    ) -> Self {
        Self {
            http,
            config,
            connectivity,
        }
    }

    pub async fn send_request(&self, request: &SignalingRequest) -> Result<(), TransportError> {
        let state = *self.connectivity.borrow();
        if state != ConnectivityState::Connected {
            debug!(kind = request.kind(), %state, "Push channel down, request refused");
            return Err(TransportError::Offline(state));
        }

        let response = self
            .http
            .post(self.config.url(SIGNALING_REQUEST_PATH))
            .header(self.config.identity_header.as_str(), self.config.identity.as_str())
            .timeout(self.config.request_timeout)
            .json(request)
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

        debug!(kind = request.kind(), "Signaling request accepted");
        Ok(())
    }

    pub async fn enter_pool(&self, criteria: &MatchCriteria) -> Result<(), TransportError> {
        self.send_request(&SignalingRequest::EnterPool(EnterPoolRequest {
            exclude_list: criteria.exclude_list.clone(),
            match_tokens: criteria.match_tokens,
        }))
        .await
    }

    pub async fn leave_pool(&self) -> Result<(), TransportError> {
        self.send_request(&SignalingRequest::LeavePool).await
    }

    pub async fn update_match_criteria(&self, criteria: &MatchCriteria) -> Result<(), TransportError> {
        self.send_request(&SignalingRequest::UpdateMatchCriteria(
            UpdateMatchCriteriaRequest {
                match_criteria: criteria.clone(),
            },
        ))
        .await
    }
}

#[async_trait]
impl NegotiationSink for SignalingClient {
    async fn forward_negotiation(
        &self,
        recipient: &Identity,
        envelope: EncodedEnvelope,
    ) -> Result<(), TransportError> {
        envelope.check_size()?;
        let request = NegotiationRequest::new(recipient.clone(), envelope);
        self.send_request(&SignalingRequest::WebRtcNegotiation(request))
            .await
    }
}
