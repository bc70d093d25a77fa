//! # Mingle Core
//!
//! Pure record model for Mingle: peers, messages, and their identities.
//!
//! This crate contains no I/O, no storage, no networking. It only knows how
//! to build records and derive their content-hash identity.
//!
//! ## Key Types
//!
//! - [`RecordId`] - Content-addressed identifier (Blake3 hash)
//! - [`Peer`] - A participant in the network
//! - [`Message`] - A point-to-point message between two peers
//! - [`PeerFields`] / [`MessageFields`] - The hashable projection of each record,
//!   which is also what travels in a sync dump
//!
//! ## Identity
//!
//! Two records built from identical hashable fields get the same id on every
//! node. See the [`canonical`] module for the exact encoding.

pub mod canonical;
pub mod error;
pub mod record;
pub mod types;

pub use canonical::{canonical_bytes, compute_id, Hashable, ID_DOMAIN};
pub use error::{CoreError, Result};
pub use record::{Message, MessageFields, Peer, PeerFields, RecordKind};
pub use types::RecordId;
