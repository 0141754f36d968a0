//! # wallette-server
//!
//! Pairing and signaling relay for Wallette.
//!
//! This binary provides:
//! - **Waiting pool** with atomic token-intersection or random matching
//! - **Matchmaker** that announces each new chat session to both participants
//! - **Push channel** (SSE), one live stream per wallet identity
//! - **Signaling relay** forwarding encrypted negotiation envelopes it never
//!   decrypts
//! - **REST API** (axum) for requests, session registration, health and pool
//!   diagnostics
//! - **Rate limiting** per wallet, or per IP when no wallet is bound

mod api;
mod config;
mod error;
mod matchmaker;
mod pool;
mod rate_limit;
mod relay;
mod signaling;
mod transport;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::matchmaker::Matchmaker;
use crate::pool::PoolStore;
use crate::rate_limit::RateLimiter;
use crate::signaling::SignalingServer;
use crate::transport::EventTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wallette_server=debug")),
        )
        .init();

    info!("Starting Wallette signaling server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        http_addr = %config.http_addr,
        identity_header = %config.identity_header,
        excluded_tokens = config.excluded_tokens.len(),
        admin_enabled = config.admin_token.is_some(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let pool = Arc::new(PoolStore::new(
        config.excluded_tokens.clone(),
        config.max_exclude_list,
    ));
    let transport = Arc::new(EventTransport::new(config.push_buffer));
    let server = Arc::new(SignalingServer::new(pool.clone(), transport.clone()));
    let rate_limiter = RateLimiter::new(config.rate_limit_rate, config.rate_limit_burst);

    let app_state = AppState {
        server,
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Matchmaker: one match attempt per pool change notification
    let changes = pool.subscribe().await;
    let matchmaker = Matchmaker::new(pool, transport);
    tokio::spawn(matchmaker.run(changes));

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
