//! # Mingle
//!
//! A peer-to-peer node that keeps a shared directory of peers and the
//! messages between them, and converges with other nodes by exchanging
//! full state over a line-delimited JSON RPC.
//!
//! ## Key Concepts
//!
//! - **Content-hash identity**: a record's id is the Blake3 hash of its
//!   hashable fields, so the same record created on two nodes is one record.
//! - **Get-or-create**: the only write path; replaying data never mutates.
//! - **Anti-entropy**: `sync_with` pulls the peer's dump, then pushes ours.
//! - **Delivery**: a message addressed to this node is handed to the
//!   application's [`ReceiveMessage`] handler once, when first stored.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mingle::{Node, NodeConfig, Unhandled};
//! use mingle::store::MemoryStore;
//!
//! async fn example() {
//!     let config = NodeConfig::default().with_name("alice").with_port(1111);
//!     let node = Node::open(config, Arc::new(MemoryStore::new()), Arc::new(Unhandled))
//!         .await
//!         .unwrap();
//!
//!     node.start().await.unwrap();
//!     node.sync_with("localhost:2222").await.unwrap();
//!     node.stop().await;
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `mingle::core` - Record model and identity
//! - `mingle::store` - Storage abstraction and SQLite
//! - `mingle::sync` - RPC transport and sync protocol

pub mod config;
pub mod delivery;
pub mod error;
pub mod node;

// Re-export component crates
pub use mingle_core as core;
pub use mingle_store as store;
pub use mingle_sync as sync;

pub use config::NodeConfig;
pub use delivery::{DeliveryHook, ReceiveMessage, Unhandled};
pub use error::{DeliveryError, NodeError, Result};
pub use node::Node;

// Re-export commonly used types
pub use mingle_core::{Message, MessageFields, Peer, PeerFields, RecordId, RecordKind};
pub use mingle_sync::{MergeReport, StateDigest, SyncConfig, SyncReport};
