//! In-memory peer connection for tests and simulation.
//!
//! Models the JSEP signaling states only; no media or ICE traffic.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use wallette_shared::protocol::{IceCandidate, SdpType, SessionDescription};
use wallette_shared::{ChatId, Identity};

use crate::error::PeerConnectionError;
use crate::negotiation::SignalingState;
use crate::peer::{PeerConnection, PeerConnectionFactory};

#[derive(Debug)]
struct MockState {
    signaling: SignalingState,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    candidates: Vec<IceCandidate>,
    rollbacks: u32,
    generation: u32,
}

pub struct MockPeerConnection {
    label: String,
    state: Mutex<MockState>,
}

impl MockPeerConnection {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(MockState {
                signaling: SignalingState::Stable,
                local: None,
                remote: None,
                candidates: Vec::new(),
                rollbacks: 0,
                generation: 0,
            }),
        }
    }

    pub async fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().await.local.clone()
    }

    pub async fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().await.remote.clone()
    }

    pub async fn candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().await.candidates.clone()
    }

    /// Local offers discarded by an incoming offer.
    pub async fn rollbacks(&self) -> u32 {
        self.state.lock().await.rollbacks
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.signaling == SignalingState::Closed
    }
}

fn closed() -> PeerConnectionError {
    PeerConnectionError("peer connection is closed".into())
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn signaling_state(&self) -> SignalingState {
        self.state.lock().await.signaling
    }

    async fn set_local_description(&self) -> Result<SessionDescription, PeerConnectionError> {
        let mut state = self.state.lock().await;
        let description = match state.signaling {
            SignalingState::Closed => return Err(closed()),
            SignalingState::HaveLocalOffer => {
                return state.local.clone().ok_or_else(closed);
            }
            SignalingState::Stable => {
                state.generation += 1;
                state.signaling = SignalingState::HaveLocalOffer;
                SessionDescription::offer(format!("offer:{}:{}", self.label, state.generation))
            }
            SignalingState::HaveRemoteOffer => {
                state.signaling = SignalingState::Stable;
                SessionDescription::answer(format!("answer:{}:{}", self.label, state.generation))
            }
        };
        state.local = Some(description.clone());
        Ok(description)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerConnectionError> {
        let mut state = self.state.lock().await;
        match (state.signaling, description.kind) {
            (SignalingState::Closed, _) => return Err(closed()),
            (SignalingState::HaveLocalOffer, SdpType::Offer) => {
                state.rollbacks += 1;
                state.local = None;
                state.signaling = SignalingState::HaveRemoteOffer;
            }
            (_, SdpType::Offer) => state.signaling = SignalingState::HaveRemoteOffer,
            (SignalingState::HaveLocalOffer, SdpType::Answer) => {
                state.signaling = SignalingState::Stable
            }
            (signaling, kind) => {
                return Err(PeerConnectionError(format!(
                    "cannot apply remote {kind:?} in {signaling:?}"
                )))
            }
        }
        state.remote = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerConnectionError> {
        let mut state = self.state.lock().await;
        if state.signaling == SignalingState::Closed {
            return Err(closed());
        }
        if state.remote.is_none() {
            return Err(PeerConnectionError(
                "candidate added before remote description".into(),
            ));
        }
        state.candidates.push(candidate);
        Ok(())
    }

    async fn close(&self) {
        self.state.lock().await.signaling = SignalingState::Closed;
    }
}

/// Hands out [`MockPeerConnection`]s and keeps them for inspection.
#[derive(Default)]
pub struct MockPeerConnectionFactory {
    created: Mutex<Vec<Arc<MockPeerConnection>>>,
}

impl MockPeerConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn created(&self) -> Vec<Arc<MockPeerConnection>> {
        self.created.lock().await.clone()
    }
}

#[async_trait]
impl PeerConnectionFactory for MockPeerConnectionFactory {
    async fn create(
        &self,
        chat_id: &ChatId,
        peer: &Identity,
    ) -> Result<Arc<dyn PeerConnection>, PeerConnectionError> {
        let pc = Arc::new(MockPeerConnection::new(format!("{}@{}", peer.short(), chat_id)));
        self.created.lock().await.push(pc.clone());
        Ok(pc)
    }
}
