use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "Wallette";

/// XChaCha20-Poly1305 nonce size in bytes (the envelope IV)
pub const NONCE_SIZE: usize = 24;

/// x25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Maximum number of identities kept in a match exclude list
pub const MAX_EXCLUDE_LIST_LENGTH: usize = 10;

/// A chat session without an open data channel after this long has failed
pub const ESTABLISHMENT_TIMEOUT: Duration = Duration::from_secs(20);

/// Upper bound of the randomized push-channel reconnect backoff
pub const MAX_RECONNECT_BACKOFF: Duration = Duration::from_millis(3000);

/// Maximum accepted size of an encoded negotiation envelope (64 KiB)
pub const MAX_ENVELOPE_SIZE: usize = 65_536;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 3001;

/// HTTP paths of the signaling API
pub const SIGNALING_EVENTS_PATH: &str = "/signaling/events";
pub const SIGNALING_REQUEST_PATH: &str = "/signaling/request";
pub const SESSION_PATH: &str = "/session";

/// ENS registrar contract; holding it says nothing about shared interests
pub const ENS_TOKEN_ADDRESS: &str = "0x57f1887a8bf19b14fc0df6fd9b2acc9af147ea85";

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_SESSION_KEY: &str = "wallette-session-key-v1";
