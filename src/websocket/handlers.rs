//! Per-connection table of message handlers.
//!
//! Inbound text frames are fanned out to attached handlers, optionally
//! narrowed by a selector. Handlers are plain channels; parsing happens on
//! the receiving side so one malformed message cannot affect the connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

/// Identity of an attached handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Receiving end of an attached handler.
pub type HandlerReceiver = mpsc::UnboundedReceiver<Arc<str>>;

#[derive(Debug, Default)]
pub struct HandlerTable {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<HandlerId, mpsc::UnboundedSender<Arc<str>>>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new handler.
    pub async fn attach(&self) -> (HandlerId, HandlerReceiver) {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.handlers.write().await.insert(id, tx);
        tracing::debug!(handler = %id, "Handler attached");
        (id, rx)
    }

    /// Remove a handler. Returns whether it was attached.
    pub async fn detach(&self, id: HandlerId) -> bool {
        let removed = self.handlers.write().await.remove(&id).is_some();
        if removed {
            tracing::debug!(handler = %id, "Handler detached");
        }
        removed
    }

    /// Forward `text` to every attached handler.
    pub async fn dispatch(&self, text: Arc<str>) -> usize {
        self.dispatch_where(text, |_| true).await
    }

    /// Forward `text` to the handlers `accept` selects.
    ///
    /// Handlers whose receiver has been dropped are pruned. Returns the number
    /// of handlers the message reached.
    pub async fn dispatch_where<F>(&self, text: Arc<str>, accept: F) -> usize
    where
        F: Fn(HandlerId) -> bool,
    {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let handlers = self.handlers.read().await;
            for (id, tx) in handlers.iter().filter(|(id, _)| accept(**id)) {
                if tx.send(text.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            let mut handlers = self.handlers.write().await;
            for id in dead {
                handlers.remove(&id);
                tracing::debug!(handler = %id, "Pruned handler with dropped receiver");
            }
        }

        delivered
    }

    pub async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handlers.read().await.is_empty()
    }
}
