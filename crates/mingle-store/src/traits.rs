//! RecordStore trait: the abstract interface for peer and message persistence.
//!
//! This trait allows the node to be storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use std::sync::Arc;

use async_trait::async_trait;
use mingle_core::{Message, MessageFields, Peer, PeerFields, RecordId, RecordKind};

use crate::error::{Result, StoreError};
use crate::listener::{ListenerId, MessageListener};

/// Result of inserting a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Record was inserted (new).
    Inserted,
    /// A record with the same id already exists (idempotent, not an error).
    AlreadyExists,
}

impl InsertResult {
    pub fn is_inserted(self) -> bool {
        matches!(self, InsertResult::Inserted)
    }
}

/// The RecordStore trait: async interface for record persistence.
///
/// # Design Notes
///
/// - **Content-addressed**: ids are derived from hashable fields, so an insert
///   of an existing id is always `AlreadyExists`, never a conflict.
/// - **Atomic inserts**: each insert is one transaction and uniqueness is
///   enforced by the backend itself, not by a prior lookup.
/// - **Notifications**: `insert_message` notifies subscribed listeners after
///   commit, exactly once per `Inserted`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Peer Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a peer.
    async fn insert_peer(&self, peer: &Peer) -> Result<InsertResult>;

    /// Get a peer by id.
    async fn get_peer(&self, id: &RecordId) -> Result<Option<Peer>>;

    /// Find every peer with the given name.
    async fn find_peers_by_name(&self, name: &str) -> Result<Vec<Peer>>;

    /// All peers.
    async fn all_peers(&self) -> Result<Vec<Peer>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Message Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a message and, if it was new, notify listeners.
    async fn insert_message(&self, message: &Message) -> Result<InsertResult>;

    /// Get a message by id.
    async fn get_message(&self, id: &RecordId) -> Result<Option<Message>>;

    /// All messages addressed to `receiver`.
    async fn messages_for(&self, receiver: &RecordId) -> Result<Vec<Message>>;

    /// All messages.
    async fn all_messages(&self) -> Result<Vec<Message>>;

    /// Set the local `received` flag. Returns false if the message is unknown.
    async fn mark_received(&self, id: &RecordId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Bookkeeping
    // ─────────────────────────────────────────────────────────────────────────

    /// Number of stored records of a kind.
    async fn count(&self, kind: RecordKind) -> Result<usize>;

    /// Register a listener for newly created messages.
    fn subscribe(&self, listener: Arc<dyn MessageListener>) -> ListenerId;

    /// Remove a listener. Returns false if it was not registered.
    fn unsubscribe(&self, id: ListenerId) -> bool;
}

/// Extension trait providing the get-or-create merge primitive.
pub trait RecordStoreExt: RecordStore {
    /// Look up the peer with these fields, creating it if absent.
    ///
    /// Returns the stored peer and whether this call created it.
    fn get_or_create_peer(
        &self,
        fields: PeerFields,
    ) -> impl std::future::Future<Output = Result<(Peer, bool)>> + Send;

    /// Look up the message with these fields, creating it if absent.
    ///
    /// An existing message is returned as stored, including its `received` flag.
    fn get_or_create_message(
        &self,
        fields: MessageFields,
    ) -> impl std::future::Future<Output = Result<(Message, bool)>> + Send;
}

impl<S: RecordStore + ?Sized> RecordStoreExt for S {
    async fn get_or_create_peer(&self, fields: PeerFields) -> Result<(Peer, bool)> {
        let peer = Peer::from_fields(fields)?;

        // Insert first: the backend's uniqueness check settles any race.
        match self.insert_peer(&peer).await? {
            InsertResult::Inserted => Ok((peer, true)),
            InsertResult::AlreadyExists => {
                let existing = self
                    .get_peer(&peer.id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(peer.id.to_hex()))?;
                Ok((existing, false))
            }
        }
    }

    async fn get_or_create_message(&self, fields: MessageFields) -> Result<(Message, bool)> {
        let message = Message::from_fields(fields)?;

        match self.insert_message(&message).await? {
            InsertResult::Inserted => Ok((message, true)),
            InsertResult::AlreadyExists => {
                let existing = self
                    .get_message(&message.id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(message.id.to_hex()))?;
                Ok((existing, false))
            }
        }
    }
}
