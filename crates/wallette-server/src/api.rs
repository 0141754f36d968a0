use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, Method},
    middleware,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post, put},
    Json, Router,
};
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use wallette_shared::auth::AuthProof;
use wallette_shared::constants::{SESSION_PATH, SIGNALING_EVENTS_PATH, SIGNALING_REQUEST_PATH};
use wallette_shared::protocol::{SignalingEvent, SignalingRequest, WalletProfile};
use wallette_shared::Identity;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::signaling::SignalingServer;

const MAX_BODY_SIZE: usize = 256 * 1024;

type EventStream = BoxStream<'static, Result<Event, axum::Error>>;

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<SignalingServer>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route(SIGNALING_EVENTS_PATH, get(signaling_events))
        .route(SIGNALING_REQUEST_PATH, post(signaling_request))
        .route(SESSION_PATH, put(register_session).delete(logout))
        .route("/admin/pool", get(admin_pool))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The identity the upstream auth layer bound to this request, if any.
pub fn bound_identity(headers: &HeaderMap, config: &ServerConfig) -> Option<Identity> {
    headers
        .get(config.identity_header.as_str())
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Identity::parse(v).ok())
}

fn require_identity(headers: &HeaderMap, config: &ServerConfig) -> Result<Identity, ServerError> {
    bound_identity(headers, config).ok_or(ServerError::Unauthorized)
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ServerError> {
    serde_json::from_slice(body).map_err(|e| ServerError::BadRequest(e.to_string()))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRegistration {
    auth_proof: AuthProof,
    #[serde(default)]
    profile: WalletProfile,
}

#[derive(Serialize)]
struct PoolStatusResponse {
    waiting: Vec<Identity>,
    length: usize,
    connections: usize,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Tears the connection down once hyper drops the SSE stream.
struct ConnectionGuard {
    server: Arc<SignalingServer>,
    identity: Identity,
    handle_id: u64,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let server = self.server.clone();
        let identity = self.identity.clone();
        let handle_id = self.handle_id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                server.disconnect(&identity, handle_id).await;
            });
        }
    }
}

fn sse_event(event: &SignalingEvent) -> Result<Event, axum::Error> {
    Event::default().json_data(event)
}

async fn signaling_events(State(state): State<AppState>, headers: HeaderMap) -> Sse<EventStream> {
    let keep_alive = KeepAlive::new().interval(state.config.keepalive);

    let Some(identity) = bound_identity(&headers, &state.config) else {
        warn!("Push channel opened without a wallet identity");
        let once = stream::once(async { sse_event(&SignalingEvent::WalletNotProvided) });
        return Sse::new(once.boxed()).keep_alive(keep_alive);
    };

    let registration = state.server.connect(&identity).await;
    let guard = ConnectionGuard {
        server: state.server.clone(),
        identity,
        handle_id: registration.handle_id,
    };

    let events = ReceiverStream::new(registration.events)
        .map(move |event| {
            let _guard = &guard;
            sse_event(&event)
        })
        .boxed();

    Sse::new(events).keep_alive(keep_alive)
}

async fn signaling_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ServerError> {
    let identity = require_identity(&headers, &state.config)?;
    let request: SignalingRequest = parse_json(&body).map_err(|e| {
        warn!(identity = %identity, error = %e, "Rejected signaling request");
        e
    })?;

    state.server.handle_request(&identity, request).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn register_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ServerError> {
    let identity = require_identity(&headers, &state.config)?;
    let registration: SessionRegistration = parse_json(&body)?;

    state
        .server
        .register_session(&identity, registration.auth_proof, registration.profile)
        .await?;
    Ok(Json(serde_json::json!({ "registered": true })))
}

async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let identity = require_identity(&headers, &state.config)?;
    state.server.logout(&identity).await;
    Ok(Json(serde_json::json!({ "loggedOut": true })))
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

async fn admin_pool(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<PoolStatusResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let waiting = state.server.pool().waiting_list().await;
    Ok(Json(PoolStatusResponse {
        length: waiting.len(),
        waiting,
        connections: state.server.transport().connection_count().await,
    }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
