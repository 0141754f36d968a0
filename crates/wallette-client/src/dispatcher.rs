//! Ordered delivery of push events to application listeners.
//!
//! Events are handed to listeners strictly in arrival order, and the next
//! event is not dispatched until every listener of the previous one has
//! settled. Negotiation envelopes depend on this.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};

use wallette_shared::protocol::SignalingEvent;

pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;
pub type ListenerFuture = BoxFuture<'static, Result<(), ListenerError>>;
type Listener = Arc<dyn Fn(SignalingEvent) -> ListenerFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
pub struct EventDispatcher {
    listeners: Arc<RwLock<Vec<(ListenerId, Listener)>>>,
    next_id: Arc<AtomicU64>,
    queue: mpsc::UnboundedSender<SignalingEvent>,
    receiver: Arc<Mutex<Option<mpsc::UnboundedReceiver<SignalingEvent>>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            queue,
            receiver: Arc::new(Mutex::new(Some(receiver))),
        }
    }

    pub async fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(SignalingEvent) -> ListenerFuture + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().await.push((id, Arc::new(listener)));
        id
    }

    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Queue an event behind everything pushed before it.
    pub fn push(&self, event: SignalingEvent) -> bool {
        self.queue.send(event).is_ok()
    }

    /// Drain the queue for as long as the calling task lives. Only the first
    /// caller gets the queue; later calls return immediately.
    pub async fn run(&self) {
        let Some(mut receiver) = self.receiver.lock().await.take() else {
            warn!("Event dispatcher already running");
            return;
        };

        while let Some(event) = receiver.recv().await {
            let listeners: Vec<Listener> = self
                .listeners
                .read()
                .await
                .iter()
                .map(|(_, l)| l.clone())
                .collect();

            let kind = event.kind();
            let results = join_all(listeners.iter().map(|l| l(event.clone()))).await;
            for result in results {
                if let Err(e) = result {
                    warn!(kind, error = %e, "Event listener failed");
                }
            }
            debug!(kind, listeners = listeners.len(), "Event dispatched");
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
