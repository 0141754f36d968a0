//! Session identity proofs.
//!
//! The server only stores and forwards an [`AuthProof`]; it never inspects
//! one. The receiving client checks the peer's proof before it trusts the
//! exchange key inside it.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::constants::APP_NAME;
use crate::crypto::parse_public_key_hex;
use crate::error::AuthProofError;
use crate::types::Identity;

const HASH_PREFIX: &str = "Hash: ";

/// Data the participant signed at login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthData {
    pub wallet_address: Identity,
    pub chain_id: String,
    pub nonce: String,
    pub session_id: String,
    /// x25519 exchange key, hex.
    pub public_key: String,
    /// Ed25519 key that signed `message`, hex.
    pub signing_key: String,
    pub screen_name: String,
}

impl AuthData {
    /// BLAKE3 over the JSON form. Field order is fixed by the struct.
    pub fn digest_hex(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthProof {
    pub message: String,
    pub signature: String,
    #[serde(rename = "authRequestData")]
    pub auth_data: AuthData,
}

/// What a verified proof yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPeer {
    pub identity: Identity,
    pub exchange_key: [u8; 32],
    pub screen_name: String,
}

pub trait ProofVerifier: Send + Sync {
    fn verify(&self, expected: &Identity, proof: &AuthProof) -> Result<VerifiedPeer, AuthProofError>;
}

/// Checks identity binding, the hash line, and the Ed25519 signature.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignedProofVerifier;

impl ProofVerifier for SignedProofVerifier {
    fn verify(&self, expected: &Identity, proof: &AuthProof) -> Result<VerifiedPeer, AuthProofError> {
        let data = &proof.auth_data;
        if &data.wallet_address != expected {
            return Err(AuthProofError::IdentityMismatch {
                proof: data.wallet_address.to_string(),
                expected: expected.to_string(),
            });
        }

        let hash = proof
            .message
            .lines()
            .last()
            .and_then(|line| line.trim().strip_prefix(HASH_PREFIX))
            .ok_or(AuthProofError::MissingHash)?;
        if hash.trim() != data.digest_hex() {
            return Err(AuthProofError::HashMismatch);
        }

        let key_bytes: [u8; 32] = hex::decode(&data.signing_key)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or(AuthProofError::InvalidSigningKey)?;
        let verifying_key =
            VerifyingKey::from_bytes(&key_bytes).map_err(|_| AuthProofError::InvalidSigningKey)?;
        let sig_bytes = hex::decode(&proof.signature).map_err(|_| AuthProofError::InvalidSignature)?;
        let signature =
            Signature::from_slice(&sig_bytes).map_err(|_| AuthProofError::InvalidSignature)?;
        verifying_key
            .verify(proof.message.as_bytes(), &signature)
            .map_err(|_| AuthProofError::InvalidSignature)?;

        let exchange_key =
            parse_public_key_hex(&data.public_key).map_err(|_| AuthProofError::InvalidPublicKey)?;

        Ok(VerifiedPeer {
            identity: data.wallet_address.clone(),
            exchange_key,
            screen_name: data.screen_name.clone(),
        })
    }
}

/// Build a proof over `data`. `data.signing_key` is overwritten with the
/// verifying half of `signing_key`.
pub fn sign_auth_data(signing_key: &SigningKey, mut data: AuthData) -> AuthProof {
    data.signing_key = hex::encode(signing_key.verifying_key().to_bytes());
    let message = format!(
        "{APP_NAME} sign-in for {}\nSession: {}\n{HASH_PREFIX}{}",
        data.wallet_address,
        data.session_id,
        data.digest_hex()
    );
    let signature = hex::encode(signing_key.sign(message.as_bytes()).to_bytes());
    AuthProof {
        message,
        signature,
        auth_data: data,
    }
}
