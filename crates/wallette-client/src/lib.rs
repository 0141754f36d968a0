//! Client side of the Wallette signaling core: the push-channel reader, the
//! ordered event dispatcher, the request sender, and one chat session per
//! match driven by perfect negotiation.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod manager;
pub mod mock;
pub mod negotiation;
pub mod peer;
pub mod push;
pub mod request;
pub mod session;
pub mod sse;

#[cfg(test)]
mod test_support;

pub use config::ClientConfig;
pub use dispatcher::EventDispatcher;
pub use error::{SessionError, TransportError};
pub use manager::SessionManager;
pub use negotiation::{ConnectionStatus, NegotiationState, Role};
pub use peer::{PeerConnection, PeerConnectionFactory};
pub use push::{ConnectivityState, PushChannel};
pub use request::{NegotiationSink, SignalingClient};
pub use session::{ChatSession, SessionEnded};
