//! Request dispatch and connection lifecycle for bound identities.

use std::sync::Arc;

use tracing::{debug, info};

use wallette_shared::auth::AuthProof;
use wallette_shared::protocol::{
    EnterPoolRequest, MatchCriteria, SignalingRequest, WalletProfile,
};
use wallette_shared::Identity;

use crate::error::ServerError;
use crate::pool::PoolStore;
use crate::relay::SignalingRelay;
use crate::transport::{EventTransport, Registration};

pub struct SignalingServer {
    pool: Arc<PoolStore>,
    transport: Arc<EventTransport>,
    relay: SignalingRelay,
}

impl SignalingServer {
    pub fn new(pool: Arc<PoolStore>, transport: Arc<EventTransport>) -> Self {
        let relay = SignalingRelay::new(transport.clone());
        Self {
            pool,
            transport,
            relay,
        }
    }

    pub fn pool(&self) -> &Arc<PoolStore> {
        &self.pool
    }

    pub fn transport(&self) -> &Arc<EventTransport> {
        &self.transport
    }

    /// Dispatch a request issued by `identity`.
    pub async fn handle_request(
        &self,
        identity: &Identity,
        request: SignalingRequest,
    ) -> Result<(), ServerError> {
        debug!(identity = %identity, kind = request.kind(), "Signaling request");
        match request {
            SignalingRequest::WebRtcNegotiation(negotiation) => {
                let (recipient, envelope) = negotiation.into_envelope();
                self.relay.relay(identity, &recipient, envelope).await?;
            }
            SignalingRequest::EnterPool(enter) => self.enter_pool(identity, enter).await,
            SignalingRequest::LeavePool => self.leave_pool(identity).await,
            SignalingRequest::UpdateMatchCriteria(update) => {
                self.update_match_criteria(identity, update.match_criteria)
                    .await
            }
        }
        Ok(())
    }

    /// Criteria first, so the enqueue lands in the right pool.
    pub async fn enter_pool(&self, identity: &Identity, request: EnterPoolRequest) {
        self.pool
            .set_match_criteria(identity, request.criteria())
            .await;
        let inserted = self.pool.enqueue(identity).await;
        let waiting = self.pool.waiting_len().await;
        info!(
            identity = %identity,
            match_tokens = request.match_tokens,
            excluded = request.exclude_list.len(),
            inserted,
            waiting,
            "Entered pool"
        );
    }

    pub async fn leave_pool(&self, identity: &Identity) {
        let removed = self.pool.dequeue(identity).await;
        info!(identity = %identity, removed, "Left pool");
    }

    pub async fn update_match_criteria(&self, identity: &Identity, criteria: MatchCriteria) {
        debug!(
            identity = %identity,
            match_tokens = criteria.match_tokens,
            excluded = criteria.exclude_list.len(),
            "Match criteria replaced"
        );
        self.pool.set_match_criteria(identity, criteria).await;
    }

    /// Open a push channel for `identity`, superseding any previous one.
    pub async fn connect(&self, identity: &Identity) -> Registration {
        let registration = self.transport.register(identity).await;
        self.pool.notify(identity).await;
        registration
    }

    /// Called when a push channel's stream is dropped. A stale handle (one
    /// already replaced by a reconnect) leaves the pool untouched.
    pub async fn disconnect(&self, identity: &Identity, handle_id: u64) {
        if self.transport.unregister_if_current(identity, handle_id).await {
            self.pool.dequeue(identity).await;
        }
    }

    /// Store what the auth collaborator vouches for and echo the profile
    /// back to its owner.
    pub async fn register_session(
        &self,
        identity: &Identity,
        proof: AuthProof,
        profile: WalletProfile,
    ) -> Result<(), ServerError> {
        if &proof.auth_data.wallet_address != identity {
            return Err(ServerError::Forbidden(
                "Auth proof was issued for another wallet".into(),
            ));
        }

        let event = profile.self_tokens_event();
        self.pool.set_auth_proof(identity, proof).await;
        self.pool.set_profile(identity, profile).await;
        self.transport.send(identity, event).await;
        info!(identity = %identity, "Session registered");
        Ok(())
    }

    pub async fn logout(&self, identity: &Identity) {
        self.transport.unregister(identity).await;
        self.pool.forget(identity).await;
        info!(identity = %identity, "Logged out");
    }
}
