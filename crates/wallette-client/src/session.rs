//! One chat session: key agreement, sealed negotiation envelopes, and the
//! establishment timer.
//!
//! All operations on a session take its lock for their whole duration, so
//! at most one negotiation step is in flight at a time.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use wallette_shared::auth::{ProofVerifier, VerifiedPeer};
use wallette_shared::crypto::{derive_session_key, KeyPair, SymmetricKey};
use wallette_shared::protocol::{
    EncodedEnvelope, IceCandidate, JoinChatEvent, NegotiationPayload, SessionDescription,
};
use wallette_shared::{ChatId, Identity};

use crate::error::SessionError;
use crate::negotiation::{
    CandidateAction, ConnectionStatus, EndReason, IceState, NegotiationState,
    RemoteDescriptionAction, Role,
};
use crate::peer::PeerConnection;
use crate::request::NegotiationSink;

/// Emitted once when a session reaches a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnded {
    pub chat_id: ChatId,
    pub reason: EndReason,
}

impl std::fmt::Display for SessionEnded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Chat {} ended: {}", self.chat_id, self.reason)
    }
}

struct SessionInner {
    negotiation: NegotiationState,
    key: Option<SymmetricKey>,
    timer: Option<JoinHandle<()>>,
}

pub struct ChatSession {
    chat_id: ChatId,
    peer: VerifiedPeer,
    pc: Arc<dyn PeerConnection>,
    sink: Arc<dyn NegotiationSink>,
    inner: Mutex<SessionInner>,
    ended: watch::Sender<Option<SessionEnded>>,
}

impl ChatSession {
    /// Verify the peer's proof, derive the session key and arm the
    /// establishment timer.
    pub async fn start(
        join: &JoinChatEvent,
        me: &Identity,
        keys: &KeyPair,
        verifier: &dyn ProofVerifier,
        pc: Arc<dyn PeerConnection>,
        sink: Arc<dyn NegotiationSink>,
        establishment_timeout: Duration,
    ) -> Result<Arc<Self>, SessionError> {
        let peer_index = join
            .peer_index(me)
            .ok_or_else(|| SessionError::NotAParticipant(me.to_string()))?;
        let peer_identity = &join.participants[peer_index];
        let peer = verifier.verify(peer_identity, &join.auth_request[peer_index])?;

        let mut shared = keys.agree(&peer.exchange_key)?;
        let key = derive_session_key(&shared, &join.chat_id);
        shared.zeroize();
        let role = Role::for_pair(me, peer_identity);

        let (ended, _) = watch::channel(None);
        let session = Arc::new(Self {
            chat_id: join.chat_id,
            peer,
            pc,
            sink,
            inner: Mutex::new(SessionInner {
                negotiation: NegotiationState::new(role),
                key: Some(key),
                timer: None,
            }),
            ended,
        });

        let timer = tokio::spawn(establishment_timer(
            Arc::downgrade(&session),
            establishment_timeout,
        ));
        session.inner.lock().await.timer = Some(timer);

        info!(
            chat_id = %session.chat_id,
            peer = %session.peer.identity,
            ?role,
            "Chat session started"
        );
        Ok(session)
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn peer(&self) -> &Identity {
        &self.peer.identity
    }

    pub fn peer_screen_name(&self) -> &str {
        &self.peer.screen_name
    }

    pub fn ended(&self) -> watch::Receiver<Option<SessionEnded>> {
        self.ended.subscribe()
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.inner.lock().await.negotiation.status
    }

    pub async fn snapshot(&self) -> NegotiationState {
        self.inner.lock().await.negotiation.clone()
    }

    /// Process one relayed envelope. Envelopes that fail to open or carry
    /// another chat id are dropped without ending the session.
    pub async fn handle_event(&self, envelope: &EncodedEnvelope) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.negotiation.is_terminal() {
            debug!(chat_id = %self.chat_id, "Dropping envelope for ended session");
            return Ok(());
        }
        // Clones wipe themselves on drop.
        let Some(key) = inner.key.clone() else {
            return Ok(());
        };

        let payload = match envelope.open(&key, &self.chat_id) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(chat_id = %self.chat_id, error = %e, "Dropping envelope");
                return Ok(());
            }
        };

        if let Some(description) = payload.description {
            self.apply_remote_description(&mut inner, &key, description)
                .await?;
        }
        if let Some(candidate) = payload.candidate {
            self.apply_remote_candidate(&mut inner, candidate).await?;
        }
        Ok(())
    }

    pub async fn on_negotiation_needed(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        let Some(key) = inner.key.clone() else {
            return Ok(());
        };
        if !inner.negotiation.on_negotiation_needed() {
            return Ok(());
        }

        let result = self.send_offer(&key).await;
        inner
            .negotiation
            .on_local_offer_sent(result.as_ref().ok().cloned());
        result.map(|_| ())
    }

    pub async fn on_local_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError> {
        let inner = self.inner.lock().await;
        if inner.negotiation.is_terminal() {
            return Ok(());
        }
        let Some(key) = inner.key.as_ref() else {
            return Ok(());
        };
        self.send(key, NegotiationPayload::candidate(self.chat_id, candidate))
            .await
    }

    pub async fn on_ice_state(&self, ice: IceState) {
        let mut inner = self.inner.lock().await;
        let before = inner.negotiation.status;
        if let Some(reason) = inner.negotiation.on_ice_state(ice) {
            warn!(chat_id = %self.chat_id, "ICE connectivity failed");
            self.teardown(&mut inner, reason).await;
        } else if inner.negotiation.status != before {
            debug!(chat_id = %self.chat_id, status = ?inner.negotiation.status, "Connection status changed");
        }
    }

    pub async fn on_data_channel_open(&self) {
        let mut inner = self.inner.lock().await;
        if inner.negotiation.is_terminal() {
            return;
        }
        inner.negotiation.on_data_channel_open();
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        info!(chat_id = %self.chat_id, peer = %self.peer.identity, "Data channel open");
    }

    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(reason) = inner.negotiation.close() {
            self.teardown(&mut inner, reason).await;
        }
    }

    async fn on_timeout(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(reason) = inner.negotiation.on_timeout() {
            warn!(chat_id = %self.chat_id, "No data channel within the establishment window");
            self.teardown(&mut inner, reason).await;
        }
    }

    async fn apply_remote_description(
        &self,
        inner: &mut SessionInner,
        key: &SymmetricKey,
        description: SessionDescription,
    ) -> Result<(), SessionError> {
        let signaling = self.pc.signaling_state().await;
        match inner.negotiation.on_remote_description(&description, signaling) {
            RemoteDescriptionAction::Drop => Ok(()),
            RemoteDescriptionAction::Ignore => {
                debug!(chat_id = %self.chat_id, "Ignoring colliding offer");
                Ok(())
            }
            RemoteDescriptionAction::Apply { answer } => {
                if let Err(e) = self.pc.set_remote_description(description.clone()).await {
                    inner.negotiation.is_setting_remote_answer_pending = false;
                    return Err(e.into());
                }
                for candidate in inner.negotiation.on_remote_answer_applied(description) {
                    if let Err(e) = self.pc.add_ice_candidate(candidate).await {
                        warn!(chat_id = %self.chat_id, error = %e, "Queued candidate rejected");
                    }
                }
                if answer {
                    let local = self.pc.set_local_description().await?;
                    inner.negotiation.on_local_answer_sent(local.clone());
                    self.send(key, NegotiationPayload::description(self.chat_id, local))
                        .await?;
                }
                Ok(())
            }
        }
    }

    async fn apply_remote_candidate(
        &self,
        inner: &mut SessionInner,
        candidate: IceCandidate,
    ) -> Result<(), SessionError> {
        match inner.negotiation.on_remote_candidate(candidate) {
            CandidateAction::Add(candidate) => {
                if let Err(e) = self.pc.add_ice_candidate(candidate).await {
                    if inner.negotiation.should_surface_candidate_error() {
                        return Err(e.into());
                    }
                    debug!(chat_id = %self.chat_id, error = %e, "Candidate rejected");
                }
            }
            CandidateAction::Queued => debug!(chat_id = %self.chat_id, "Candidate queued"),
            CandidateAction::Ignore => {
                debug!(chat_id = %self.chat_id, "Ignoring candidate of ignored offer")
            }
            CandidateAction::Drop => {}
        }
        Ok(())
    }

    async fn send_offer(&self, key: &SymmetricKey) -> Result<SessionDescription, SessionError> {
        let offer = self.pc.set_local_description().await?;
        self.send(key, NegotiationPayload::description(self.chat_id, offer.clone()))
            .await?;
        Ok(offer)
    }

    async fn send(&self, key: &SymmetricKey, payload: NegotiationPayload) -> Result<(), SessionError> {
        let envelope = EncodedEnvelope::seal(key, &payload)?;
        self.sink
            .forward_negotiation(&self.peer.identity, envelope)
            .await?;
        Ok(())
    }

    async fn teardown(&self, inner: &mut SessionInner, reason: EndReason) {
        if let Some(mut key) = inner.key.take() {
            key.zeroize();
        }
        let timer = inner.timer.take();

        self.pc.close().await;
        self.ended.send_replace(Some(SessionEnded {
            chat_id: self.chat_id,
            reason,
        }));
        info!(chat_id = %self.chat_id, %reason, "Chat session ended");

        // Last: this may be the timer task itself.
        if let Some(timer) = timer {
            timer.abort();
        }
    }
}

async fn establishment_timer(session: Weak<ChatSession>, after: Duration) {
    tokio::time::sleep(after).await;
    if let Some(session) = session.upgrade() {
        session.on_timeout().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::mock::MockPeerConnection;
    use crate::negotiation::SignalingState;
    use crate::test_support::{join_event, wallet, TestWallet};
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use wallette_shared::auth::SignedProofVerifier;

    type Outbox = mpsc::UnboundedReceiver<(Identity, EncodedEnvelope)>;

    struct ChannelSink(mpsc::UnboundedSender<(Identity, EncodedEnvelope)>);

    #[async_trait]
    impl NegotiationSink for ChannelSink {
        async fn forward_negotiation(
            &self,
            recipient: &Identity,
            envelope: EncodedEnvelope,
        ) -> Result<(), TransportError> {
            let _ = self.0.send((recipient.clone(), envelope));
            Ok(())
        }
    }

    struct Side {
        session: Arc<ChatSession>,
        pc: Arc<MockPeerConnection>,
        outbox: Outbox,
    }

    async fn side(join: &JoinChatEvent, me: &TestWallet, timeout: Duration) -> Side {
        let pc = Arc::new(MockPeerConnection::new(me.identity.as_str()));
        let (tx, outbox) = mpsc::unbounded_channel();
        let session = ChatSession::start(
            join,
            &me.identity,
            &me.keys,
            &SignedProofVerifier,
            pc.clone(),
            Arc::new(ChannelSink(tx)),
            timeout,
        )
        .await
        .unwrap();
        Side {
            session,
            pc,
            outbox,
        }
    }

    async fn deliver(from: &mut Side, to: &Side) -> usize {
        let mut delivered = 0;
        while let Ok((recipient, envelope)) = from.outbox.try_recv() {
            assert_eq!(&recipient, from.session.peer());
            to.session.handle_event(&envelope).await.unwrap();
            delivered += 1;
        }
        delivered
    }

    fn candidate() -> IceCandidate {
        IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 192.0.2.1 54321 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }

    const WINDOW: Duration = Duration::from_secs(20);

    #[tokio::test]
    async fn test_simultaneous_offers_converge() {
        let alice = wallet("0xa11ce");
        let bob = wallet("0xb0b");
        let join = join_event(ChatId::new(), &alice, &bob);
        let mut a = side(&join, &alice, WINDOW).await;
        let mut b = side(&join, &bob, WINDOW).await;
        assert_eq!(a.session.snapshot().await.role, Role::Polite);
        assert_eq!(b.session.snapshot().await.role, Role::Impolite);

        a.session.on_negotiation_needed().await.unwrap();
        b.session.on_negotiation_needed().await.unwrap();
        a.session.on_local_candidate(candidate()).await.unwrap();

        // Bob is mid-offer and impolite: alice's offer and candidate are ignored.
        assert_eq!(deliver(&mut a, &b).await, 2);
        assert_eq!(b.session.snapshot().await.ignored_offers, 1);
        assert!(b.pc.candidates().await.is_empty());
        assert_eq!(b.pc.signaling_state().await, SignalingState::HaveLocalOffer);

        // Alice rolls back and answers bob's offer.
        assert_eq!(deliver(&mut b, &a).await, 1);
        assert_eq!(a.pc.rollbacks().await, 1);
        assert_eq!(deliver(&mut a, &b).await, 1);

        assert_eq!(a.pc.signaling_state().await, SignalingState::Stable);
        assert_eq!(b.pc.signaling_state().await, SignalingState::Stable);
        assert_eq!(a.pc.remote_description().await, b.pc.local_description().await);
        assert_eq!(b.pc.remote_description().await, a.pc.local_description().await);
        assert!(!b.session.snapshot().await.ignore_offer);

        a.session.on_data_channel_open().await;
        b.session.on_data_channel_open().await;
        assert_eq!(a.session.status().await, ConnectionStatus::Connected);
        assert_eq!(b.session.status().await, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_candidates_after_answer_are_added() {
        let alice = wallet("0xa11ce");
        let bob = wallet("0xb0b");
        let join = join_event(ChatId::new(), &alice, &bob);
        let mut a = side(&join, &alice, WINDOW).await;
        let mut b = side(&join, &bob, WINDOW).await;

        b.session.on_negotiation_needed().await.unwrap();
        b.session.on_local_candidate(candidate()).await.unwrap();
        deliver(&mut b, &a).await;
        deliver(&mut a, &b).await;

        assert_eq!(a.pc.candidates().await, vec![candidate()]);
        assert_eq!(b.pc.signaling_state().await, SignalingState::Stable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_data_channel_within_window_fails() {
        let alice = wallet("0xa11ce");
        let bob = wallet("0xb0b");
        let join = join_event(ChatId::new(), &alice, &bob);
        let mut a = side(&join, &alice, WINDOW).await;
        let mut b = side(&join, &bob, WINDOW).await;
        let ended = a.session.ended();

        b.session.on_negotiation_needed().await.unwrap();
        tokio::time::sleep(WINDOW + Duration::from_secs(1)).await;

        assert_eq!(
            *ended.borrow(),
            Some(SessionEnded {
                chat_id: join.chat_id,
                reason: EndReason::Timeout,
            })
        );
        assert_eq!(a.session.status().await, ConnectionStatus::Failed);
        assert_eq!(b.session.status().await, ConnectionStatus::Failed);
        assert!(a.pc.is_closed().await);

        // Nothing more is processed for this chat.
        deliver(&mut b, &a).await;
        assert!(a.pc.remote_description().await.is_none());
        a.session.on_negotiation_needed().await.unwrap();
        assert!(a.outbox.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_data_channel_disarms_timer() {
        let alice = wallet("0xa11ce");
        let bob = wallet("0xb0b");
        let join = join_event(ChatId::new(), &alice, &bob);
        let a = side(&join, &alice, WINDOW).await;

        a.session.on_data_channel_open().await;
        tokio::time::sleep(WINDOW * 2).await;

        assert!(a.session.ended().borrow().is_none());
        assert_eq!(a.session.status().await, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_ice_failure_ends_session() {
        let alice = wallet("0xa11ce");
        let bob = wallet("0xb0b");
        let join = join_event(ChatId::new(), &alice, &bob);
        let a = side(&join, &alice, WINDOW).await;

        a.session.on_ice_state(IceState::Checking).await;
        assert_eq!(a.session.status().await, ConnectionStatus::Connecting);
        a.session.on_ice_state(IceState::Failed).await;

        assert_eq!(a.session.ended().borrow().map(|e| e.reason), Some(EndReason::IceFailed));
        assert!(a.pc.is_closed().await);
    }

    #[tokio::test]
    async fn test_stale_or_corrupt_envelopes_dropped() {
        let alice = wallet("0xa11ce");
        let bob = wallet("0xb0b");
        let join = join_event(ChatId::new(), &alice, &bob);
        let b = side(&join, &bob, WINDOW).await;

        let shared = alice.keys.agree(&bob.keys.public_key_bytes()).unwrap();
        let key = derive_session_key(&shared, &join.chat_id);
        let stale = EncodedEnvelope::seal(
            &key,
            &NegotiationPayload::description(ChatId::new(), SessionDescription::offer("old")),
        )
        .unwrap();
        b.session.handle_event(&stale).await.unwrap();

        let corrupt = EncodedEnvelope {
            encoded_iv: "AAAA".into(),
            encoded_ice_negotiation: "AAAA".into(),
        };
        b.session.handle_event(&corrupt).await.unwrap();

        assert!(b.pc.remote_description().await.is_none());
        assert!(!b.session.snapshot().await.is_terminal());

        let fresh = EncodedEnvelope::seal(
            &key,
            &NegotiationPayload::description(join.chat_id, SessionDescription::offer("new")),
        )
        .unwrap();
        b.session.handle_event(&fresh).await.unwrap();
        assert_eq!(
            b.pc.remote_description().await,
            Some(SessionDescription::offer("new"))
        );
    }

    #[tokio::test]
    async fn test_start_rejects_outsiders_and_bad_proofs() {
        let alice = wallet("0xa11ce");
        let bob = wallet("0xb0b");
        let carol = wallet("0xca201");
        let join = join_event(ChatId::new(), &alice, &bob);
        let pc = || Arc::new(MockPeerConnection::new("x"));
        let sink = || Arc::new(ChannelSink(mpsc::unbounded_channel().0));

        let err = ChatSession::start(
            &join, &carol.identity, &carol.keys, &SignedProofVerifier, pc(), sink(), WINDOW,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, SessionError::NotAParticipant(_)));

        let mut forged = join.clone();
        forged.auth_request[1] = carol.proof.clone();
        let err = ChatSession::start(
            &forged, &alice.identity, &alice.keys, &SignedProofVerifier, pc(), sink(), WINDOW,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, SessionError::Proof(_)));
    }

    #[tokio::test]
    async fn test_close_discards_key_and_signals_once() {
        let alice = wallet("0xa11ce");
        let bob = wallet("0xb0b");
        let join = join_event(ChatId::new(), &alice, &bob);
        let mut a = side(&join, &alice, WINDOW).await;
        let mut ended = a.session.ended();

        a.session.close().await;
        assert!(ended.has_changed().unwrap());
        let notice = ended.borrow_and_update().unwrap();
        assert_eq!(notice.reason, EndReason::Closed);
        assert_eq!(
            notice.to_string(),
            format!("Chat {} ended: the chat was closed", join.chat_id)
        );

        a.session.close().await;
        assert!(!ended.has_changed().unwrap());

        a.session.on_local_candidate(candidate()).await.unwrap();
        assert!(a.outbox.try_recv().is_err());
        assert_eq!(a.session.status().await, ConnectionStatus::Disconnected);
    }
}
