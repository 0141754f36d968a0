use std::time::Duration;

use wallette_shared::constants::{ESTABLISHMENT_TIMEOUT, MAX_RECONNECT_BACKOFF};
use wallette_shared::Identity;

/// Client-side settings for one signed-in wallet.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Signaling server root, e.g. `https://signal.example.org`.
    pub base_url: String,

    /// The signed-in wallet.
    pub identity: Identity,

    /// Header carrying `identity`. Behind a real auth proxy the proxy
    /// overwrites it with the verified value.
    pub identity_header: String,

    /// Upper bound of the randomized push-channel reconnect delay.
    pub max_reconnect_backoff: Duration,

    /// A chat session without an open data channel after this long fails.
    pub establishment_timeout: Duration,

    /// Timeout for individual signaling requests. Never applied to the push
    /// channel.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, identity: Identity) -> Self {
        Self {
            base_url: base_url.into(),
            identity,
            identity_header: "x-wallet-address".to_string(),
            max_reconnect_backoff: MAX_RECONNECT_BACKOFF,
            establishment_timeout: ESTABLISHMENT_TIMEOUT,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}
