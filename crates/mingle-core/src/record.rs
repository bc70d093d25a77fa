//! Peer and Message records.
//!
//! Every record is split into its hashable fields (which determine identity and
//! are what a sync dump carries) and the locally derived id. Constructors always
//! recompute the id, so an id read off the wire is never trusted.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::canonical::{compute_id, Hashable};
use crate::error::{CoreError, Result};
use crate::types::RecordId;

/// The record kinds tracked by the store and exchanged during sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Peer,
    Message,
}

impl RecordKind {
    /// All kinds, in merge order (peers before the messages that reference them).
    pub const ALL: [RecordKind; 2] = [RecordKind::Peer, RecordKind::Message];

    /// Name used in sync dumps and hash domains.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Peer => "Peer",
            RecordKind::Message => "Message",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Peer
// ─────────────────────────────────────────────────────────────────────────────

/// Hashable projection of a [`Peer`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerFields {
    /// Human-readable label.
    pub name: String,
    /// `host:port` used to reach this peer.
    pub connection: String,
}

impl Hashable for PeerFields {
    const KIND: RecordKind = RecordKind::Peer;
}

impl PeerFields {
    /// Check the fields describe a reachable, named peer.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CoreError::InvalidField {
                field: "name",
                reason: "must not be empty".into(),
            });
        }

        let Some((host, port)) = self.connection.rsplit_once(':') else {
            return Err(CoreError::InvalidField {
                field: "connection",
                reason: format!("expected host:port, got {:?}", self.connection),
            });
        };
        if host.is_empty() {
            return Err(CoreError::InvalidField {
                field: "connection",
                reason: format!("missing host in {:?}", self.connection),
            });
        }
        port.parse::<u16>().map_err(|_| CoreError::InvalidField {
            field: "connection",
            reason: format!("invalid port in {:?}", self.connection),
        })?;

        Ok(())
    }
}

/// A participant in the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub id: RecordId,
    pub name: String,
    pub connection: String,
}

impl Peer {
    /// Build a peer, deriving its id from `name` and `connection`.
    pub fn new(name: impl Into<String>, connection: impl Into<String>) -> Result<Self> {
        Self::from_fields(PeerFields {
            name: name.into(),
            connection: connection.into(),
        })
    }

    /// Build a peer from its hashable fields.
    pub fn from_fields(fields: PeerFields) -> Result<Self> {
        fields.validate()?;
        let id = compute_id(&fields)?;
        Ok(Self {
            id,
            name: fields.name,
            connection: fields.connection,
        })
    }

    /// Project to the hashable fields.
    pub fn fields(&self) -> PeerFields {
        PeerFields {
            name: self.name.clone(),
            connection: self.connection.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message
// ─────────────────────────────────────────────────────────────────────────────

/// Hashable projection of a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageFields {
    pub sender: RecordId,
    pub receiver: RecordId,
    pub message: String,
}

impl Hashable for MessageFields {
    const KIND: RecordKind = RecordKind::Message;
}

/// A single message from one peer to another.
///
/// `sender` and `receiver` are peer ids that may not be known locally yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    pub id: RecordId,
    pub sender: RecordId,
    pub receiver: RecordId,
    pub message: String,
    /// Local delivery acknowledgment. Not part of identity, never synced.
    pub received: bool,
}

impl Message {
    /// Build a message, deriving its id from sender, receiver and payload.
    pub fn new(sender: RecordId, receiver: RecordId, message: impl Into<String>) -> Result<Self> {
        Self::from_fields(MessageFields {
            sender,
            receiver,
            message: message.into(),
        })
    }

    /// Build a message from its hashable fields.
    pub fn from_fields(fields: MessageFields) -> Result<Self> {
        let id = compute_id(&fields)?;
        Ok(Self {
            id,
            sender: fields.sender,
            receiver: fields.receiver,
            message: fields.message,
            received: false,
        })
    }

    /// Project to the hashable fields.
    pub fn fields(&self) -> MessageFields {
        MessageFields {
            sender: self.sender,
            receiver: self.receiver,
            message: self.message.clone(),
        }
    }

    /// Whether this message is addressed to the given peer.
    pub fn is_for(&self, peer: &RecordId) -> bool {
        &self.receiver == peer
    }
}
