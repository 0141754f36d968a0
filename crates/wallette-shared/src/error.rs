use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletteError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Auth proof error: {0}")]
    AuthProof(#[from] AuthProofError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Invalid nonce length: expected {expected}, got {got}")]
    InvalidNonceLength { expected: usize, got: usize },

    #[error("Low-order public key rejected")]
    NonContributory,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Empty identity")]
    EmptyIdentity,

    #[error("Invalid base64 field '{field}': {source}")]
    Base64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("Envelope too large: {size} bytes (max {max})")]
    EnvelopeTooLarge { size: usize, max: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unexpected chat id: expected {expected}, got {got}")]
    ChatIdMismatch { expected: String, got: String },
}

#[derive(Error, Debug)]
pub enum AuthProofError {
    #[error("Proof was issued for {proof}, expected {expected}")]
    IdentityMismatch { proof: String, expected: String },

    #[error("Message does not carry the auth data hash")]
    MissingHash,

    #[error("Auth data hash does not match the message")]
    HashMismatch,

    #[error("Invalid signing key")]
    InvalidSigningKey,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid exchange public key")]
    InvalidPublicKey,
}
