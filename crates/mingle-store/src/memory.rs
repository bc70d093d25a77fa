//! In-memory implementation of the RecordStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use mingle_core::{Message, Peer, RecordId, RecordKind};

use crate::error::{Result, StoreError};
use crate::listener::{ListenerId, Listeners, MessageListener};
use crate::traits::{InsertResult, RecordStore};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock; a
/// single write lock makes check-and-insert atomic.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
    listeners: Listeners,
}

#[derive(Default)]
struct MemoryStoreInner {
    peers: BTreeMap<RecordId, Peer>,
    messages: BTreeMap<RecordId, Message>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
            listeners: Listeners::new(),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_peer(&self, peer: &Peer) -> Result<InsertResult> {
        let mut inner = self.write()?;

        if inner.peers.contains_key(&peer.id) {
            return Ok(InsertResult::AlreadyExists);
        }
        inner.peers.insert(peer.id, peer.clone());

        Ok(InsertResult::Inserted)
    }

    async fn get_peer(&self, id: &RecordId) -> Result<Option<Peer>> {
        Ok(self.read()?.peers.get(id).cloned())
    }

    async fn find_peers_by_name(&self, name: &str) -> Result<Vec<Peer>> {
        Ok(self
            .read()?
            .peers
            .values()
            .filter(|p| p.name == name)
            .cloned()
            .collect())
    }

    async fn all_peers(&self) -> Result<Vec<Peer>> {
        Ok(self.read()?.peers.values().cloned().collect())
    }

    async fn insert_message(&self, message: &Message) -> Result<InsertResult> {
        let result = {
            let mut inner = self.write()?;
            if inner.messages.contains_key(&message.id) {
                InsertResult::AlreadyExists
            } else {
                inner.messages.insert(message.id, message.clone());
                InsertResult::Inserted
            }
        };

        if result.is_inserted() {
            self.listeners.notify_created(message).await;
        }

        Ok(result)
    }

    async fn get_message(&self, id: &RecordId) -> Result<Option<Message>> {
        Ok(self.read()?.messages.get(id).cloned())
    }

    async fn messages_for(&self, receiver: &RecordId) -> Result<Vec<Message>> {
        Ok(self
            .read()?
            .messages
            .values()
            .filter(|m| m.is_for(receiver))
            .cloned()
            .collect())
    }

    async fn all_messages(&self) -> Result<Vec<Message>> {
        Ok(self.read()?.messages.values().cloned().collect())
    }

    async fn mark_received(&self, id: &RecordId) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.messages.get_mut(id) {
            Some(message) => {
                message.received = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count(&self, kind: RecordKind) -> Result<usize> {
        let inner = self.read()?;
        Ok(match kind {
            RecordKind::Peer => inner.peers.len(),
            RecordKind::Message => inner.messages.len(),
        })
    }

    fn subscribe(&self, listener: Arc<dyn MessageListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}
