use std::collections::BTreeSet;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::auth::AuthProof;
use crate::constants::{MAX_ENVELOPE_SIZE, MAX_EXCLUDE_LIST_LENGTH};
use crate::crypto::{self, SymmetricKey};
use crate::error::{ProtocolError, WalletteError};
use crate::types::{ChatId, Identity};

// ─── Requests (client → server) ───

/// Every request a client may POST to the signaling endpoint.
///
/// Bodies with an unknown `type` tag fail to deserialize and are rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SignalingRequest {
    #[serde(rename = "WebRTCNegotiation")]
    WebRtcNegotiation(NegotiationRequest),
    EnterPool(EnterPoolRequest),
    LeavePool,
    UpdateMatchCriteria(UpdateMatchCriteriaRequest),
}

impl SignalingRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingRequest::WebRtcNegotiation(_) => "WebRTCNegotiation",
            SignalingRequest::EnterPool(_) => "EnterPool",
            SignalingRequest::LeavePool => "LeavePool",
            SignalingRequest::UpdateMatchCriteria(_) => "UpdateMatchCriteria",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnterPoolRequest {
    #[serde(default)]
    pub exclude_list: Vec<Identity>,
    pub match_tokens: bool,
}

impl EnterPoolRequest {
    pub fn criteria(&self) -> MatchCriteria {
        MatchCriteria::new(self.match_tokens, self.exclude_list.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMatchCriteriaRequest {
    pub match_criteria: MatchCriteria,
}

/// Forward an encrypted envelope to `recipient`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationRequest {
    #[serde(rename = "walletAddress")]
    pub recipient: Identity,
    pub encoded_iv: String,
    pub encoded_ice_negotiation: String,
}

impl NegotiationRequest {
    pub fn new(recipient: Identity, envelope: EncodedEnvelope) -> Self {
        Self {
            recipient,
            encoded_iv: envelope.encoded_iv,
            encoded_ice_negotiation: envelope.encoded_ice_negotiation,
        }
    }

    pub fn into_envelope(self) -> (Identity, EncodedEnvelope) {
        (
            self.recipient,
            EncodedEnvelope {
                encoded_iv: self.encoded_iv,
                encoded_ice_negotiation: self.encoded_ice_negotiation,
            },
        )
    }
}

/// Per-identity matching policy. Always replaced wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MatchCriteria {
    #[serde(default)]
    pub exclude_list: Vec<Identity>,
    pub match_tokens: bool,
}

impl MatchCriteria {
    /// Dedupes the exclude list (first occurrence wins) and caps its length.
    pub fn new(match_tokens: bool, exclude_list: Vec<Identity>) -> Self {
        Self::bounded(match_tokens, exclude_list, MAX_EXCLUDE_LIST_LENGTH)
    }

    pub fn bounded(match_tokens: bool, exclude_list: Vec<Identity>, max: usize) -> Self {
        let mut seen = BTreeSet::new();
        let exclude_list = exclude_list
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .take(max)
            .collect();
        Self {
            exclude_list,
            match_tokens,
        }
    }

    pub fn excludes(&self, identity: &Identity) -> bool {
        self.exclude_list.contains(identity)
    }

    /// Most-recent-first: `peer` moves to the front, the oldest entry falls off.
    pub fn remember_peer(&mut self, peer: Identity) {
        self.exclude_list.retain(|id| id != &peer);
        self.exclude_list.insert(0, peer);
        self.exclude_list.truncate(MAX_EXCLUDE_LIST_LENGTH);
    }
}

impl Default for MatchCriteria {
    fn default() -> Self {
        Self {
            exclude_list: Vec::new(),
            match_tokens: true,
        }
    }
}

// ─── Events (server → client) ───

/// Everything the server pushes down a client's event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SignalingEvent {
    #[serde(rename = "WebRTCNegotiation")]
    WebRtcNegotiation(EncodedEnvelope),
    JoinChatEvent(JoinChatEvent),
    SelfTokensEvent(SelfTokensEvent),
    OtherParticipantTokensEvent(OtherParticipantTokensEvent),
    WalletNotProvided,
}

impl SignalingEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingEvent::WebRtcNegotiation(_) => "WebRTCNegotiation",
            SignalingEvent::JoinChatEvent(_) => "JoinChatEvent",
            SignalingEvent::SelfTokensEvent(_) => "SelfTokensEvent",
            SignalingEvent::OtherParticipantTokensEvent(_) => "OtherParticipantTokensEvent",
            SignalingEvent::WalletNotProvided => "WalletNotProvided",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn from_json(data: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(data).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

/// Session start, sent to both participants of a fresh match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinChatEvent {
    pub chat_id: ChatId,
    pub participants: [Identity; 2],
    pub auth_request: [AuthProof; 2],
}

impl JoinChatEvent {
    /// Index of the participant that is not `me`.
    pub fn peer_index(&self, me: &Identity) -> Option<usize> {
        match self.participants.iter().position(|p| p == me)? {
            0 => Some(1),
            _ => Some(0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelfTokensEvent {
    #[serde(rename = "allNFT")]
    pub all_nft: Vec<NftToken>,
    #[serde(rename = "allERC20")]
    pub all_erc20: Vec<serde_json::Value>,
    #[serde(rename = "walletENS")]
    pub wallet_ens: String,
}

/// The other participant's wallet snapshot, plus what the two have in common.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtherParticipantTokensEvent {
    #[serde(rename = "walletAddress")]
    pub wallet_address: Identity,
    #[serde(rename = "walletENS")]
    pub wallet_ens: String,
    #[serde(rename = "allNFT")]
    pub all_nft: Vec<NftToken>,
    #[serde(rename = "allERC20")]
    pub all_erc20: Vec<serde_json::Value>,
    #[serde(rename = "matchedNFTs")]
    pub matched_nfts: Vec<String>,
}

// ─── Wallet profile ───

/// An NFT holding. Only the contract address matters for matching; the rest
/// is display metadata passed through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NftToken {
    pub token_address: String,
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl NftToken {
    pub fn new(token_address: impl Into<String>) -> Self {
        Self {
            token_address: token_address.into(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// Wallet metadata supplied by the token enrichment collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WalletProfile {
    #[serde(rename = "allNFT", default)]
    pub all_nft: Vec<NftToken>,
    #[serde(rename = "allERC20", default)]
    pub all_erc20: Vec<serde_json::Value>,
    #[serde(rename = "walletENS", default)]
    pub wallet_ens: Option<String>,
}

impl WalletProfile {
    /// Lowercased contract addresses of every held NFT.
    pub fn token_set(&self) -> BTreeSet<String> {
        self.all_nft
            .iter()
            .map(|t| t.token_address.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn self_tokens_event(&self) -> SignalingEvent {
        SignalingEvent::SelfTokensEvent(SelfTokensEvent {
            all_nft: self.all_nft.clone(),
            all_erc20: self.all_erc20.clone(),
            wallet_ens: self.wallet_ens.clone().unwrap_or_default(),
        })
    }

    pub fn peer_tokens_event(&self, owner: &Identity, matched: Vec<String>) -> SignalingEvent {
        SignalingEvent::OtherParticipantTokensEvent(OtherParticipantTokensEvent {
            wallet_address: owner.clone(),
            wallet_ens: self.wallet_ens.clone().unwrap_or_default(),
            all_nft: self.all_nft.clone(),
            all_erc20: self.all_erc20.clone(),
            matched_nfts: matched,
        })
    }
}

// ─── Negotiation payload ───

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn is_offer(&self) -> bool {
        self.kind == SdpType::Offer
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

/// What travels inside an envelope: one description or one candidate,
/// tagged with the chat it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NegotiationPayload {
    pub chat_id: ChatId,
    pub description: Option<SessionDescription>,
    pub candidate: Option<IceCandidate>,
}

impl NegotiationPayload {
    pub fn description(chat_id: ChatId, description: SessionDescription) -> Self {
        Self {
            chat_id,
            description: Some(description),
            candidate: None,
        }
    }

    pub fn candidate(chat_id: ChatId, candidate: IceCandidate) -> Self {
        Self {
            chat_id,
            description: None,
            candidate: Some(candidate),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

/// Encrypted negotiation payload as it crosses the relay: base64 IV and
/// base64 ciphertext. The server never looks inside.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EncodedEnvelope {
    pub encoded_iv: String,
    pub encoded_ice_negotiation: String,
}

impl EncodedEnvelope {
    pub fn seal(key: &SymmetricKey, payload: &NegotiationPayload) -> Result<Self, WalletteError> {
        let plaintext = payload
            .to_bytes()
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        let (nonce, ciphertext) = crypto::seal(key, &plaintext)?;
        Ok(Self {
            encoded_iv: B64.encode(nonce),
            encoded_ice_negotiation: B64.encode(ciphertext),
        })
    }

    /// Decrypts and checks the embedded chat id against the one expected.
    pub fn open(
        &self,
        key: &SymmetricKey,
        expected: &ChatId,
    ) -> Result<NegotiationPayload, WalletteError> {
        self.check_size()?;
        let nonce = B64
            .decode(&self.encoded_iv)
            .map_err(|source| ProtocolError::Base64 {
                field: "encodedIv",
                source,
            })?;
        let ciphertext =
            B64.decode(&self.encoded_ice_negotiation)
                .map_err(|source| ProtocolError::Base64 {
                    field: "encodedIceNegotiation",
                    source,
                })?;
        let plaintext = crypto::open(key, &nonce, &ciphertext)?;
        let payload = NegotiationPayload::from_bytes(&plaintext)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;

        if &payload.chat_id != expected {
            return Err(ProtocolError::ChatIdMismatch {
                expected: expected.to_string(),
                got: payload.chat_id.to_string(),
            }
            .into());
        }
        Ok(payload)
    }

    pub fn encoded_len(&self) -> usize {
        self.encoded_iv.len() + self.encoded_ice_negotiation.len()
    }

    pub fn check_size(&self) -> Result<(), ProtocolError> {
        let size = self.encoded_len();
        if size > MAX_ENVELOPE_SIZE {
            return Err(ProtocolError::EnvelopeTooLarge {
                size,
                max: MAX_ENVELOPE_SIZE,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derive_session_key, KeyPair};

    fn id(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    fn session_key(chat_id: &ChatId) -> SymmetricKey {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        derive_session_key(&a.agree(&b.public_key_bytes()).unwrap(), chat_id)
    }

    #[test]
    fn test_enter_pool_request_wire_format() {
        let json = r#"{"type":"EnterPool","excludeList":["0xBB"],"matchTokens":true}"#;
        let req: SignalingRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            req,
            SignalingRequest::EnterPool(EnterPoolRequest {
                exclude_list: vec![id("0xbb")],
                match_tokens: true,
            })
        );
    }

    #[test]
    fn test_leave_pool_and_negotiation_requests() {
        let leave: SignalingRequest = serde_json::from_str(r#"{"type":"LeavePool"}"#).unwrap();
        assert_eq!(leave, SignalingRequest::LeavePool);

        let json = r#"{"type":"WebRTCNegotiation","walletAddress":"0xAA","encodedIv":"aXY=","encodedIceNegotiation":"Ym9keQ=="}"#;
        match serde_json::from_str::<SignalingRequest>(json).unwrap() {
            SignalingRequest::WebRtcNegotiation(req) => {
                assert_eq!(req.recipient, id("0xaa"));
                assert_eq!(req.encoded_iv, "aXY=");
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_unknown_request_tag_rejected() {
        assert!(serde_json::from_str::<SignalingRequest>(r#"{"type":"Teleport"}"#).is_err());
        assert!(serde_json::from_str::<SignalingRequest>(r#"{"matchTokens":true}"#).is_err());
    }

    #[test]
    fn test_event_tags() {
        let json = SignalingEvent::WalletNotProvided.to_json().unwrap();
        assert_eq!(json, r#"{"type":"WalletNotProvided"}"#);

        let env = SignalingEvent::WebRtcNegotiation(EncodedEnvelope {
            encoded_iv: "aXY=".into(),
            encoded_ice_negotiation: "eA==".into(),
        });
        let value: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "WebRTCNegotiation");
        assert_eq!(value["encodedIv"], "aXY=");

        assert!(SignalingEvent::from_json(r#"{"type":"Nope"}"#).is_err());
    }

    #[test]
    fn test_peer_tokens_event_field_names() {
        let profile = WalletProfile {
            all_nft: vec![NftToken::new("0xC0FFEE")],
            all_erc20: vec![],
            wallet_ens: Some("alice.eth".into()),
        };
        let event = profile.peer_tokens_event(&id("0xaa"), vec!["0xc0ffee".into()]);
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "OtherParticipantTokensEvent");
        assert_eq!(value["walletENS"], "alice.eth");
        assert_eq!(value["matchedNFTs"][0], "0xc0ffee");
        assert_eq!(value["allNFT"][0]["token_address"], "0xC0FFEE");
    }

    #[test]
    fn test_nft_metadata_passes_through() {
        let json = r#"{"token_address":"0xAbC","token_id":"15","name":"Kitties"}"#;
        let token: NftToken = serde_json::from_str(json).unwrap();
        assert_eq!(token.metadata["token_id"], "15");
        let back = serde_json::to_value(&token).unwrap();
        assert_eq!(back["name"], "Kitties");
    }

    #[test]
    fn test_token_set_is_lowercased() {
        let profile = WalletProfile {
            all_nft: vec![NftToken::new("0xAA"), NftToken::new("0xaa"), NftToken::new(" ")],
            ..Default::default()
        };
        let set = profile.token_set();
        assert_eq!(set.len(), 1);
        assert!(set.contains("0xaa"));
    }

    #[test]
    fn test_criteria_bounded_and_deduped() {
        let list: Vec<Identity> = (0..15).map(|i| id(&format!("0x{i}"))).collect();
        let mut with_dupes = vec![id("0x1"), id("0x1")];
        with_dupes.extend(list);
        let criteria = MatchCriteria::new(false, with_dupes);
        assert_eq!(criteria.exclude_list.len(), MAX_EXCLUDE_LIST_LENGTH);
        assert_eq!(criteria.exclude_list[0], id("0x1"));
        assert_eq!(criteria.exclude_list[1], id("0x0"));
    }

    #[test]
    fn test_remember_peer_most_recent_first() {
        let mut criteria = MatchCriteria::default();
        for i in 0..12 {
            criteria.remember_peer(id(&format!("0x{i}")));
        }
        criteria.remember_peer(id("0x5"));
        assert_eq!(criteria.exclude_list.len(), MAX_EXCLUDE_LIST_LENGTH);
        assert_eq!(criteria.exclude_list[0], id("0x5"));
        assert_eq!(criteria.exclude_list[1], id("0x11"));
        assert!(!criteria.excludes(&id("0x0")));
    }

    #[test]
    fn test_envelope_seal_open() {
        let chat_id = ChatId::new();
        let key = session_key(&chat_id);
        let payload = NegotiationPayload::description(chat_id, SessionDescription::offer("v=0"));

        let envelope = EncodedEnvelope::seal(&key, &payload).unwrap();
        assert_eq!(envelope.open(&key, &chat_id).unwrap(), payload);
    }

    #[test]
    fn test_envelope_for_stale_chat_rejected() {
        let stale = ChatId::new();
        let current = ChatId::new();
        let key = session_key(&stale);
        let payload = NegotiationPayload::candidate(
            stale,
            IceCandidate {
                candidate: "candidate:1 1 udp 1 10.0.0.1 9 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
            },
        );

        let envelope = EncodedEnvelope::seal(&key, &payload).unwrap();
        assert!(matches!(
            envelope.open(&key, &current),
            Err(WalletteError::Protocol(ProtocolError::ChatIdMismatch { .. }))
        ));
    }

    #[test]
    fn test_envelope_bad_base64() {
        let chat_id = ChatId::new();
        let key = session_key(&chat_id);
        let envelope = EncodedEnvelope {
            encoded_iv: "!!!".into(),
            encoded_ice_negotiation: "eA==".into(),
        };
        assert!(matches!(
            envelope.open(&key, &chat_id),
            Err(WalletteError::Protocol(ProtocolError::Base64 { field: "encodedIv", .. }))
        ));
    }

    #[test]
    fn test_join_chat_peer_index() {
        let a = id("0xaa");
        let b = id("0xbb");
        let proof = crate::auth::tests::proof_for(&a);
        let event = JoinChatEvent {
            chat_id: ChatId::new(),
            participants: [a.clone(), b.clone()],
            auth_request: [proof.clone(), proof],
        };
        assert_eq!(event.peer_index(&a), Some(1));
        assert_eq!(event.peer_index(&b), Some(0));
        assert_eq!(event.peer_index(&id("0xcc")), None);
    }
}
