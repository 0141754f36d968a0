//! Reacts to pool changes and turns a matched pair into a chat session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};

use wallette_shared::auth::AuthProof;
use wallette_shared::protocol::{JoinChatEvent, SignalingEvent, WalletProfile};
use wallette_shared::{ChatId, Identity};

use crate::pool::{PoolMatch, PoolStore};
use crate::transport::EventTransport;

/// A session announced to both participants. Not persisted.
#[derive(Debug, Clone)]
pub struct MatchedSession {
    pub chat_id: ChatId,
    pub participants: [Identity; 2],
    pub created_at: DateTime<Utc>,
}

struct Side {
    identity: Identity,
    profile: Option<WalletProfile>,
    proof: Option<AuthProof>,
    connected: bool,
}

impl Side {
    fn is_complete(&self) -> bool {
        self.connected && self.profile.is_some() && self.proof.is_some()
    }
}

pub struct Matchmaker {
    pool: Arc<PoolStore>,
    transport: Arc<EventTransport>,
}

impl Matchmaker {
    pub fn new(pool: Arc<PoolStore>, transport: Arc<EventTransport>) -> Self {
        Self { pool, transport }
    }

    /// Consume change notifications until the pool goes away.
    pub async fn run(self, mut changes: mpsc::UnboundedReceiver<Identity>) {
        info!("Matchmaker running");
        while let Some(identity) = changes.recv().await {
            self.on_changed(&identity).await;
        }
        info!("Matchmaker stopped");
    }

    /// One match attempt for the identity that changed.
    pub async fn on_changed(&self, identity: &Identity) -> Option<MatchedSession> {
        if self.pool.waiting_len().await < 2 {
            return None;
        }

        let PoolMatch { pair, mode } = self.pool.find_and_remove_match(identity).await?;
        // Either side may re-enter the pool from here on. That is a new
        // request and stays queued.
        let [a, b] = pair;

        let first = self.side(a).await;
        let second = self.side(b).await;

        if !(first.is_complete() && second.is_complete()) {
            for side in [&first, &second] {
                if side.is_complete() {
                    warn!(identity = %side.identity, "Partner vanished during pairing, re-enqueueing");
                    self.pool.enqueue(&side.identity).await;
                } else {
                    warn!(
                        identity = %side.identity,
                        connected = side.connected,
                        has_profile = side.profile.is_some(),
                        has_proof = side.proof.is_some(),
                        "Dropping incomplete side of match"
                    );
                }
            }
            return None;
        }

        let (
            Side {
                identity: a,
                profile: Some(profile_a),
                proof: Some(proof_a),
                ..
            },
            Side {
                identity: b,
                profile: Some(profile_b),
                proof: Some(proof_b),
                ..
            },
        ) = (first, second)
        else {
            return None;
        };

        let session = MatchedSession {
            chat_id: ChatId::new(),
            participants: [a.clone(), b.clone()],
            created_at: Utc::now(),
        };

        let join = SignalingEvent::JoinChatEvent(JoinChatEvent {
            chat_id: session.chat_id,
            participants: session.participants.clone(),
            auth_request: [proof_a, proof_b],
        });
        self.transport.send(&a, join.clone()).await;
        self.transport.send(&b, join).await;

        let matched = self.pool.matched_tokens(&a, &b).await;
        self.transport
            .send(&a, profile_b.peer_tokens_event(&b, matched.clone()))
            .await;
        self.transport
            .send(&b, profile_a.peer_tokens_event(&a, matched.clone()))
            .await;

        info!(
            chat_id = %session.chat_id,
            a = %a,
            b = %b,
            mode = %mode,
            matched_tokens = matched.len(),
            "Chat session started"
        );
        Some(session)
    }

    async fn side(&self, identity: Identity) -> Side {
        Side {
            connected: self.transport.has_handle(&identity).await,
            profile: self.pool.profile(&identity).await,
            proof: self.pool.auth_proof(&identity).await,
            identity,
        }
    }
}
