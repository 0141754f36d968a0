//! Routes push events to the current chat session and keeps the wallet's
//! match criteria between sessions.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use wallette_shared::auth::ProofVerifier;
use wallette_shared::crypto::KeyPair;
use wallette_shared::protocol::{
    JoinChatEvent, MatchCriteria, OtherParticipantTokensEvent, SelfTokensEvent, SignalingEvent,
};

use crate::config::ClientConfig;
use crate::dispatcher::{ListenerError, ListenerFuture};
use crate::error::SessionError;
use crate::peer::PeerConnectionFactory;
use crate::request::NegotiationSink;
use crate::session::ChatSession;

#[derive(Default)]
struct ManagerState {
    current: Option<Arc<ChatSession>>,
    criteria: MatchCriteria,
    self_tokens: Option<SelfTokensEvent>,
    peer_tokens: Option<OtherParticipantTokensEvent>,
}

pub struct SessionManager {
    config: Arc<ClientConfig>,
    keys: KeyPair,
    verifier: Arc<dyn ProofVerifier>,
    factory: Arc<dyn PeerConnectionFactory>,
    sink: Arc<dyn NegotiationSink>,
    state: Mutex<ManagerState>,
}

impl SessionManager {
    pub fn new(
        config: Arc<ClientConfig>,
        keys: KeyPair,
        verifier: Arc<dyn ProofVerifier>,
        factory: Arc<dyn PeerConnectionFactory>,
        sink: Arc<dyn NegotiationSink>,
    ) -> Self {
        Self {
            config,
            keys,
            verifier,
            factory,
            sink,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Criteria to send with the next `EnterPool`.
    pub async fn criteria(&self) -> MatchCriteria {
        self.state.lock().await.criteria.clone()
    }

    pub async fn set_match_tokens(&self, match_tokens: bool) {
        self.state.lock().await.criteria.match_tokens = match_tokens;
    }

    pub async fn current_session(&self) -> Option<Arc<ChatSession>> {
        self.state.lock().await.current.clone()
    }

    pub async fn self_tokens(&self) -> Option<SelfTokensEvent> {
        self.state.lock().await.self_tokens.clone()
    }

    pub async fn peer_tokens(&self) -> Option<OtherParticipantTokensEvent> {
        self.state.lock().await.peer_tokens.clone()
    }

    pub async fn handle_event(&self, event: SignalingEvent) -> Result<(), SessionError> {
        match event {
            SignalingEvent::JoinChatEvent(join) => self.join(join).await,
            SignalingEvent::WebRtcNegotiation(envelope) => {
                // Not holding the manager lock while the session works.
                let current = self.state.lock().await.current.clone();
                match current {
                    Some(session) => session.handle_event(&envelope).await,
                    None => {
                        debug!("Negotiation envelope without a session, dropped");
                        Ok(())
                    }
                }
            }
            SignalingEvent::SelfTokensEvent(tokens) => {
                debug!(nfts = tokens.all_nft.len(), "Own wallet profile received");
                self.state.lock().await.self_tokens = Some(tokens);
                Ok(())
            }
            SignalingEvent::OtherParticipantTokensEvent(tokens) => {
                info!(
                    peer = %tokens.wallet_address,
                    matched = tokens.matched_nfts.len(),
                    "Peer wallet profile received"
                );
                self.state.lock().await.peer_tokens = Some(tokens);
                Ok(())
            }
            SignalingEvent::WalletNotProvided => {
                warn!(identity = %self.config.identity, "Server saw no wallet identity on the push channel");
                Ok(())
            }
        }
    }

    /// Close the current session, if any.
    pub async fn close_session(&self) {
        let current = self.state.lock().await.current.take();
        if let Some(session) = current {
            session.close().await;
        }
    }

    /// Listener for [`crate::dispatcher::EventDispatcher::add_listener`].
    pub fn listener(
        self: &Arc<Self>,
    ) -> impl Fn(SignalingEvent) -> ListenerFuture + Send + Sync + 'static {
        let manager = Arc::clone(self);
        move |event| {
            let manager = manager.clone();
            async move {
                manager
                    .handle_event(event)
                    .await
                    .map_err(ListenerError::from)
            }
            .boxed()
        }
    }

    async fn join(&self, join: JoinChatEvent) -> Result<(), SessionError> {
        let me = &self.config.identity;
        let Some(peer_index) = join.peer_index(me) else {
            warn!(chat_id = %join.chat_id, "Session start for a chat without us");
            return Err(SessionError::NotAParticipant(me.to_string()));
        };
        let peer = join.participants[peer_index].clone();

        let previous = {
            let mut state = self.state.lock().await;
            state.criteria.remember_peer(peer.clone());
            state.peer_tokens = None;
            state.current.take()
        };
        if let Some(previous) = previous {
            previous.close().await;
        }

        let pc = self.factory.create(&join.chat_id, &peer).await?;
        let session = match ChatSession::start(
            &join,
            me,
            &self.keys,
            self.verifier.as_ref(),
            pc.clone(),
            self.sink.clone(),
            self.config.establishment_timeout,
        )
        .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!(chat_id = %join.chat_id, peer = %peer, error = %e, "Session start abandoned");
                pc.close().await;
                return Err(e);
            }
        };

        self.state.lock().await.current = Some(session);
        Ok(())
    }
}
