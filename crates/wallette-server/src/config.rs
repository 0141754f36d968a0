//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::time::Duration;

use wallette_shared::constants::{DEFAULT_HTTP_PORT, ENS_TOKEN_ADDRESS, MAX_EXCLUDE_LIST_LENGTH};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3001`
    pub http_addr: SocketAddr,

    /// Request header carrying the identity bound by the upstream auth layer.
    /// Env: `IDENTITY_HEADER`
    /// Default: `x-wallet-address`
    pub identity_header: String,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Token contracts that never count towards a match.
    /// Env: `EXCLUDED_TOKENS` (comma separated)
    /// Default: the ENS registrar.
    pub excluded_tokens: Vec<String>,

    /// Cap on a participant's exclude list.
    /// Env: `MAX_EXCLUDE_LIST`
    /// Default: `10`
    pub max_exclude_list: usize,

    /// Outbound event buffer per push connection.
    /// Env: `PUSH_BUFFER`
    /// Default: `64`
    pub push_buffer: usize,

    /// SSE keep-alive comment interval.
    /// Env: `KEEPALIVE_SECS`
    /// Default: `15`
    pub keepalive: Duration,

    /// Sustained request rate per identity (or IP when unbound).
    /// Env: `RATE_LIMIT_RATE`
    /// Default: `20`
    pub rate_limit_rate: f64,

    /// Burst capacity of the rate limiter.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: `60`
    pub rate_limit_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            identity_header: "x-wallet-address".to_string(),
            admin_token: None,
            excluded_tokens: vec![ENS_TOKEN_ADDRESS.to_string()],
            max_exclude_list: MAX_EXCLUDE_LIST_LENGTH,
            push_buffer: 64,
            keepalive: Duration::from_secs(15),
            rate_limit_rate: 20.0,
            rate_limit_burst: 60.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(header) = lookup("IDENTITY_HEADER") {
            let header = header.trim().to_lowercase();
            if !header.is_empty() {
                config.identity_header = header;
            }
        }

        if let Some(token) = lookup("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(list) = lookup("EXCLUDED_TOKENS") {
            config.excluded_tokens = list
                .split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
        }

        if let Some(val) = lookup("MAX_EXCLUDE_LIST") {
            match val.parse::<usize>() {
                Ok(n) => config.max_exclude_list = n,
                Err(_) => tracing::warn!(value = %val, "Invalid MAX_EXCLUDE_LIST, using default"),
            }
        }

        if let Some(val) = lookup("PUSH_BUFFER") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.push_buffer = n,
                _ => tracing::warn!(value = %val, "Invalid PUSH_BUFFER, using default"),
            }
        }

        if let Some(val) = lookup("KEEPALIVE_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.keepalive = Duration::from_secs(n),
                _ => tracing::warn!(value = %val, "Invalid KEEPALIVE_SECS, using default"),
            }
        }

        if let Some(val) = lookup("RATE_LIMIT_RATE") {
            match val.parse::<f64>() {
                Ok(n) if n > 0.0 => config.rate_limit_rate = n,
                _ => tracing::warn!(value = %val, "Invalid RATE_LIMIT_RATE, using default"),
            }
        }

        if let Some(val) = lookup("RATE_LIMIT_BURST") {
            match val.parse::<f64>() {
                Ok(n) if n > 0.0 => config.rate_limit_burst = n,
                _ => tracing::warn!(value = %val, "Invalid RATE_LIMIT_BURST, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
