//! Seam between a chat session and the real-time media stack.
//!
//! A session only needs the JSEP surface used by perfect negotiation. Events
//! flowing the other way (negotiation needed, local candidates, ICE state,
//! data channel open) are fed into [`crate::session::ChatSession`] by the
//! embedder.

use std::sync::Arc;

use async_trait::async_trait;

use wallette_shared::protocol::{IceCandidate, SessionDescription};
use wallette_shared::{ChatId, Identity};

use crate::error::PeerConnectionError;
use crate::negotiation::SignalingState;

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn signaling_state(&self) -> SignalingState;

    /// Implicit `setLocalDescription()`: creates an offer in `stable`, an
    /// answer in `have-remote-offer`.
    async fn set_local_description(&self) -> Result<SessionDescription, PeerConnectionError>;

    /// Applying an offer while `have-local-offer` rolls the local offer back.
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerConnectionError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerConnectionError>;

    /// Releases the data channel and the connection.
    async fn close(&self);
}

/// Creates one peer connection per chat session.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        chat_id: &ChatId,
        peer: &Identity,
    ) -> Result<Arc<dyn PeerConnection>, PeerConnectionError>;
}
