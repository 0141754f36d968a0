//! Per-identity delivery handles for the push channel.
//!
//! Each identity has at most one live handle. Registering again replaces the
//! previous one; the old stream ends once its sender is dropped. Events for an
//! identity without a handle are dropped, nothing is buffered across
//! reconnects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use wallette_shared::protocol::SignalingEvent;
use wallette_shared::Identity;

struct Handle {
    id: u64,
    tx: mpsc::Sender<SignalingEvent>,
}

/// The receiving end handed to a freshly opened push channel.
pub struct Registration {
    pub handle_id: u64,
    pub events: mpsc::Receiver<SignalingEvent>,
}

pub struct EventTransport {
    handles: RwLock<HashMap<Identity, Handle>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl EventTransport {
    pub fn new(buffer: usize) -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    pub async fn register(&self, identity: &Identity) -> Registration {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let replaced = self
            .handles
            .write()
            .await
            .insert(identity.clone(), Handle { id, tx })
            .is_some();

        info!(identity = %identity, handle = id, replaced, "Push channel registered");
        Registration {
            handle_id: id,
            events: rx,
        }
    }

    pub async fn unregister(&self, identity: &Identity) -> bool {
        let removed = self.handles.write().await.remove(identity).is_some();
        if removed {
            info!(identity = %identity, "Push channel unregistered");
        }
        removed
    }

    /// Unregister only if `handle_id` is still the live handle. A stream that
    /// was superseded must not tear down its replacement.
    pub async fn unregister_if_current(&self, identity: &Identity, handle_id: u64) -> bool {
        let mut handles = self.handles.write().await;
        match handles.get(identity) {
            Some(handle) if handle.id == handle_id => {
                handles.remove(identity);
                info!(identity = %identity, handle = handle_id, "Push channel closed");
                true
            }
            _ => false,
        }
    }

    pub async fn has_handle(&self, identity: &Identity) -> bool {
        self.handles
            .read()
            .await
            .get(identity)
            .map(|h| !h.tx.is_closed())
            .unwrap_or(false)
    }

    /// Best-effort, in-order delivery to the live handle. A handle whose
    /// buffer is full is unregistered, which ends its stream.
    ///
    /// Returns `false` if the event was dropped.
    pub async fn send(&self, identity: &Identity, event: SignalingEvent) -> bool {
        let handles = self.handles.read().await;
        let Some(handle) = handles.get(identity) else {
            debug!(identity = %identity, kind = event.kind(), "No push channel, dropping event");
            return false;
        };

        match handle.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                // Skipping one event would leave a gap in an ordered stream.
                // End the stream instead; the client reconnects.
                let handle_id = handle.id;
                drop(handles);
                warn!(
                    identity = %identity,
                    kind = event.kind(),
                    handle = handle_id,
                    "Push channel full, closing it"
                );
                self.unregister_if_current(identity, handle_id).await;
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(
                    identity = %identity,
                    kind = event.kind(),
                    "Push channel closed, dropping event"
                );
                false
            }
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.handles.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_send_preserves_order() {
        let transport = EventTransport::new(8);
        let alice = id("0xa11ce");
        let mut reg = transport.register(&alice).await;

        transport.send(&alice, SignalingEvent::WalletNotProvided).await;
        let profile = wallette_shared::protocol::WalletProfile::default();
        transport.send(&alice, profile.self_tokens_event()).await;

        assert_eq!(reg.events.recv().await.unwrap().kind(), "WalletNotProvided");
        assert_eq!(reg.events.recv().await.unwrap().kind(), "SelfTokensEvent");
    }

    #[tokio::test]
    async fn test_send_without_handle_is_dropped() {
        let transport = EventTransport::new(8);
        assert!(!transport.send(&id("0xb0b"), SignalingEvent::WalletNotProvided).await);
    }

    #[tokio::test]
    async fn test_new_handle_supersedes_old() {
        let transport = EventTransport::new(8);
        let alice = id("0xa11ce");
        let mut first = transport.register(&alice).await;
        let mut second = transport.register(&alice).await;

        assert!(transport.send(&alice, SignalingEvent::WalletNotProvided).await);
        assert!(second.events.recv().await.is_some());
        // The replaced sender was dropped, so the old stream ends.
        assert!(first.events.recv().await.is_none());

        // The superseded stream closing must not remove the live handle.
        assert!(!transport.unregister_if_current(&alice, first.handle_id).await);
        assert!(transport.has_handle(&alice).await);
        assert!(transport.unregister_if_current(&alice, second.handle_id).await);
        assert!(!transport.has_handle(&alice).await);
    }

    #[tokio::test]
    async fn test_full_buffer_closes_stream() {
        let transport = EventTransport::new(1);
        let alice = id("0xa11ce");
        let mut reg = transport.register(&alice).await;

        assert!(transport.send(&alice, SignalingEvent::WalletNotProvided).await);
        assert!(!transport.send(&alice, SignalingEvent::WalletNotProvided).await);
        assert!(!transport.has_handle(&alice).await);
        assert_eq!(transport.connection_count().await, 0);

        // What was buffered still arrives, then the stream ends.
        assert!(reg.events.recv().await.is_some());
        assert!(reg.events.recv().await.is_none());
        assert!(!transport.send(&alice, SignalingEvent::WalletNotProvided).await);
    }

    #[tokio::test]
    async fn test_dropped_receiver_reports_no_handle() {
        let transport = EventTransport::new(4);
        let alice = id("0xa11ce");
        let reg = transport.register(&alice).await;
        drop(reg);
        assert!(!transport.has_handle(&alice).await);
        assert_eq!(transport.connection_count().await, 1);
        assert!(transport.unregister(&alice).await);
        assert_eq!(transport.connection_count().await, 0);
    }
}
