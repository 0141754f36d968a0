//! Perfect negotiation as an explicit state value.
//!
//! Every transition is a plain method on [`NegotiationState`]: it updates the
//! flags and tells the caller what to do with the peer connection. Nothing in
//! here awaits, so collision handling is testable without a transport.

use wallette_shared::protocol::{IceCandidate, SessionDescription};
use wallette_shared::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Yields on offer collision: rolls back its own offer.
    Polite,
    /// Wins offer collisions: ignores the incoming offer.
    Impolite,
}

impl Role {
    /// The smaller identity of the pair is polite. Both sides compute the
    /// same answer without talking to each other.
    pub fn for_pair(me: &Identity, peer: &Identity) -> Self {
        if me.is_polite_towards(peer) {
            Role::Polite
        } else {
            Role::Impolite
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Negotiating,
    Connected,
    Failed,
    Disconnected,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Failed | Phase::Disconnected)
    }
}

/// JSEP signaling state, as far as negotiation cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// What the user sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Waiting,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Timeout,
    IceFailed,
    Closed,
}

/// Shown to the user when a chat ends.
impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EndReason::Timeout => "the connection could not be established in time",
            EndReason::IceFailed => "the connection to the peer failed",
            EndReason::Closed => "the chat was closed",
        };
        f.write_str(s)
    }
}

/// What to do with a remote description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDescriptionAction {
    /// Apply it; if `answer` is set, reply with a local answer afterwards.
    Apply { answer: bool },
    /// Offer collision lost by the remote side.
    Ignore,
    /// The session is over.
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateAction {
    Add(IceCandidate),
    /// No remote description yet; held until one is applied.
    Queued,
    /// Belongs to an ignored offer.
    Ignore,
    Drop,
}

#[derive(Debug, Clone)]
pub struct NegotiationState {
    pub role: Role,
    pub phase: Phase,
    pub status: ConnectionStatus,
    pub making_offer: bool,
    pub ignore_offer: bool,
    pub is_setting_remote_answer_pending: bool,
    pub local_description: Option<SessionDescription>,
    pub remote_description: Option<SessionDescription>,
    pub pending_candidates: Vec<IceCandidate>,
    pub ignored_offers: u32,
}

impl NegotiationState {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            phase: Phase::Idle,
            status: ConnectionStatus::Waiting,
            making_offer: false,
            ignore_offer: false,
            is_setting_remote_answer_pending: false,
            local_description: None,
            remote_description: None,
            pending_candidates: Vec::new(),
            ignored_offers: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Returns whether the caller should create and send an offer.
    pub fn on_negotiation_needed(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.making_offer = true;
        self.enter_negotiating();
        true
    }

    /// The local offer went out (or failed to). `making_offer` drops either way.
    pub fn on_local_offer_sent(&mut self, offer: Option<SessionDescription>) {
        self.making_offer = false;
        if offer.is_some() {
            self.local_description = offer;
        }
    }

    pub fn on_local_answer_sent(&mut self, answer: SessionDescription) {
        self.local_description = Some(answer);
    }

    pub fn on_remote_description(
        &mut self,
        description: &SessionDescription,
        signaling: SignalingState,
    ) -> RemoteDescriptionAction {
        if self.is_terminal() {
            return RemoteDescriptionAction::Drop;
        }

        let ready_for_offer = !self.making_offer
            && (signaling == SignalingState::Stable || self.is_setting_remote_answer_pending);
        let offer_collision = description.is_offer() && !ready_for_offer;

        self.ignore_offer = self.role == Role::Impolite && offer_collision;
        if self.ignore_offer {
            self.ignored_offers += 1;
            return RemoteDescriptionAction::Ignore;
        }

        self.is_setting_remote_answer_pending = !description.is_offer();
        self.enter_negotiating();
        RemoteDescriptionAction::Apply {
            answer: description.is_offer(),
        }
    }

    /// The remote description was applied. Returns candidates that arrived
    /// before it.
    pub fn on_remote_answer_applied(&mut self, description: SessionDescription) -> Vec<IceCandidate> {
        self.is_setting_remote_answer_pending = false;
        self.remote_description = Some(description);
        std::mem::take(&mut self.pending_candidates)
    }

    pub fn on_remote_candidate(&mut self, candidate: IceCandidate) -> CandidateAction {
        if self.is_terminal() {
            return CandidateAction::Drop;
        }
        if self.ignore_offer {
            return CandidateAction::Ignore;
        }
        if self.remote_description.is_none() {
            self.pending_candidates.push(candidate);
            return CandidateAction::Queued;
        }
        CandidateAction::Add(candidate)
    }

    /// Candidate errors are expected noise while an offer is being ignored.
    pub fn should_surface_candidate_error(&self) -> bool {
        !self.ignore_offer
    }

    pub fn on_ice_state(&mut self, ice: IceState) -> Option<EndReason> {
        if self.is_terminal() {
            return None;
        }
        match ice {
            IceState::Checking => self.status = ConnectionStatus::Connecting,
            IceState::Connected | IceState::Completed => self.status = ConnectionStatus::Connected,
            IceState::Disconnected => self.status = ConnectionStatus::Disconnected,
            IceState::Failed => {
                self.fail();
                return Some(EndReason::IceFailed);
            }
            IceState::New | IceState::Closed => {}
        }
        None
    }

    pub fn on_data_channel_open(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.phase = Phase::Connected;
        self.status = ConnectionStatus::Connected;
    }

    /// The establishment window elapsed. Fails the session unless the data
    /// channel already opened.
    pub fn on_timeout(&mut self) -> Option<EndReason> {
        if self.is_terminal() || self.phase == Phase::Connected {
            return None;
        }
        self.fail();
        Some(EndReason::Timeout)
    }

    pub fn close(&mut self) -> Option<EndReason> {
        if self.is_terminal() {
            return None;
        }
        self.phase = Phase::Disconnected;
        self.status = ConnectionStatus::Disconnected;
        self.making_offer = false;
        self.pending_candidates.clear();
        Some(EndReason::Closed)
    }

    fn enter_negotiating(&mut self) {
        if self.phase == Phase::Idle {
            self.phase = Phase::Negotiating;
        }
    }

    fn fail(&mut self) {
        self.phase = Phase::Failed;
        self.status = ConnectionStatus::Failed;
        self.making_offer = false;
        self.pending_candidates.clear();
    }
}
