use thiserror::Error;

use wallette_shared::error::{AuthProofError, CryptoError, ProtocolError, WalletteError};

use crate::push::ConnectivityState;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server rejected request ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Push channel is {0}, request not sent")]
    Offline(ConnectivityState),
}

/// Failure reported by a peer connection implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct PeerConnectionError(pub String);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{0} is not a participant of this chat")]
    NotAParticipant(String),

    #[error("Peer auth proof rejected: {0}")]
    Proof(#[from] AuthProofError),

    #[error("Key agreement failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Envelope error: {0}")]
    Envelope(#[from] WalletteError),

    #[error("Peer connection error: {0}")]
    PeerConnection(#[from] PeerConnectionError),

    #[error("Signaling transport error: {0}")]
    Transport(#[from] TransportError),
}
