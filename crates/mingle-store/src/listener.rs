//! Post-commit notifications for newly created messages.
//!
//! Stores call [`Listeners::notify_created`] after a message row has been
//! committed, and only when the insert actually created the row.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use mingle_core::Message;

/// Receives a callback for every message the store newly creates.
///
/// Runs on the task that performed the insert. No store lock is held while
/// the callback runs, so a listener may call back into the store.
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn on_message_created(&self, message: &Message);
}

/// Handle returned by [`Listeners::add`], used to remove that listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registry of listeners owned by a store.
#[derive(Default)]
pub struct Listeners {
    next: AtomicU64,
    inner: RwLock<Vec<(ListenerId, Arc<dyn MessageListener>)>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn add(&self, listener: Arc<dyn MessageListener>) -> ListenerId {
        let id = ListenerId(self.next.fetch_add(1, Ordering::Relaxed));
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = inner.len();
        inner.retain(|(registered, _)| *registered != id);
        inner.len() != before
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify every listener of a newly created message, in registration order.
    pub async fn notify_created(&self, message: &Message) {
        // Snapshot so the registry lock is not held across listener awaits.
        let listeners: Vec<Arc<dyn MessageListener>> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener.on_message_created(message).await;
        }
    }
}
