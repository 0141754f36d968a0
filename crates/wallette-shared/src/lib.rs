//! Types shared by the Wallette signaling server and its clients: identities,
//! the request/event wire protocol, envelope crypto and auth proofs.

pub mod auth;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod types;

pub use types::{ChatId, Identity, MatchMode};
