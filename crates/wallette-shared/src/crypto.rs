use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::{KDF_CONTEXT_SESSION_KEY, NONCE_SIZE, PUBKEY_SIZE};
use crate::error::CryptoError;
use crate::types::ChatId;

pub type Nonce = [u8; NONCE_SIZE];

/// Per-session XChaCha20-Poly1305 key. Wiped on drop; clones are wiped too.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Long-lived x25519 key pair owned by one client.
///
/// The pair is reused across chat sessions; only the per-session key derived
/// from it is thrown away when a session ends.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key_bytes(&self) -> [u8; PUBKEY_SIZE] {
        self.public.to_bytes()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.as_bytes())
    }

    /// x25519 with the peer's public key. Rejects low-order points.
    pub fn agree(&self, peer_public: &[u8; PUBKEY_SIZE]) -> Result<[u8; 32], CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer_public));
        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }
        Ok(shared.to_bytes())
    }
}

pub fn parse_public_key_hex(hex_key: &str) -> Result<[u8; PUBKEY_SIZE], CryptoError> {
    let bytes = hex::decode(hex_key.trim()).map_err(|_| CryptoError::InvalidKeyLength)?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength)
}

// BLAKE3 KDF with domain separation, bound to the chat
pub fn derive_session_key(shared_secret: &[u8], chat_id: &ChatId) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_SESSION_KEY);
    hasher.update(shared_secret);
    hasher.update(chat_id.as_bytes());
    SymmetricKey(*hasher.finalize().as_bytes())
}

pub fn generate_nonce() -> Nonce {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Fresh random nonce per call; returned separately so it can travel as the IV
pub fn seal(key: &SymmetricKey, plaintext: &[u8]) -> Result<(Nonce, Vec<u8>), CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok((nonce_bytes, ciphertext))
}

pub fn open(key: &SymmetricKey, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidNonceLength {
            expected: NONCE_SIZE,
            got: nonce.len(),
        });
    }

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = XNonce::from_slice(nonce);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}
