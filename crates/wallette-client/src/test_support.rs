//! Test fixtures: signed wallets, and an in-process axum server that plays
//! back scripted responses to exercise the reqwest paths.

use std::collections::VecDeque;
use std::sync::Arc;

use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};

use wallette_shared::auth::{sign_auth_data, AuthData, AuthProof};
use wallette_shared::crypto::KeyPair;
use wallette_shared::protocol::JoinChatEvent;
use wallette_shared::{ChatId, Identity};

/// One canned reply.
pub enum Scripted {
    Status(StatusCode, String),
    Sse(Vec<String>),
}

impl IntoResponse for Scripted {
    fn into_response(self) -> Response {
        match self {
            Scripted::Status(status, body) => {
                (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
            }
            Scripted::Sse(events) => {
                let body: String = events.iter().map(|e| format!("data: {e}\n\n")).collect();
                ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
            }
        }
    }
}

/// A request as the scripted server saw it.
#[derive(Debug)]
pub struct SeenRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: String,
}

/// Answers successive requests with `responses` in order, then with 503, and
/// reports every request it saw.
pub async fn scripted_server(
    responses: Vec<Scripted>,
) -> (String, mpsc::UnboundedReceiver<SeenRequest>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let script = Arc::new(Mutex::new(VecDeque::from(responses)));

    let app = Router::new().fallback(
        move |method: Method, uri: Uri, headers: HeaderMap, body: String| {
            let script = script.clone();
            let tx = tx.clone();
            async move {
                let _ = tx.send(SeenRequest {
                    method,
                    path: uri.path().to_string(),
                    headers,
                    body,
                });
                match script.lock().await.pop_front() {
                    Some(reply) => reply.into_response(),
                    None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
                }
            }
        },
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{addr}"), rx)
}

pub fn sse_response(events: &[&str]) -> Scripted {
    Scripted::Sse(events.iter().map(|e| e.to_string()).collect())
}

pub fn status_response(status: StatusCode, body: &str) -> Scripted {
    Scripted::Status(status, body.to_string())
}

/// A wallet with its exchange keys and a proof binding them.
pub struct TestWallet {
    pub identity: Identity,
    pub keys: KeyPair,
    pub proof: AuthProof,
}

pub fn wallet(address: &str) -> TestWallet {
    let identity = Identity::parse(address).unwrap();
    let keys = KeyPair::generate();
    let proof = sign_auth_data(
        &SigningKey::generate(&mut OsRng),
        AuthData {
            wallet_address: identity.clone(),
            chain_id: "0x1".into(),
            nonce: "7".into(),
            session_id: format!("session-{address}"),
            public_key: keys.public_key_hex(),
            signing_key: String::new(),
            screen_name: address.into(),
        },
    );
    TestWallet {
        identity,
        keys,
        proof,
    }
}

pub fn join_event(chat_id: ChatId, a: &TestWallet, b: &TestWallet) -> JoinChatEvent {
    JoinChatEvent {
        chat_id,
        participants: [a.identity.clone(), b.identity.clone()],
        auth_request: [a.proof.clone(), b.proof.clone()],
    }
}
