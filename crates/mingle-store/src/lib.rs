//! # Mingle Store
//!
//! Storage abstraction for Mingle. Provides a trait-based interface for
//! peer and message persistence with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`RecordStore`] - The async trait for all storage operations
//! - [`RecordStoreExt`] - The get-or-create merge primitive built on top
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`MessageListener`] - Post-commit notification for newly created messages
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mingle_core::PeerFields;
//! use mingle_store::{RecordStoreExt, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("mingle.db").unwrap();
//!
//!     let fields = PeerFields {
//!         name: "node1".into(),
//!         connection: "localhost:1111".into(),
//!     };
//!     let (peer, created) = store.get_or_create_peer(fields).await.unwrap();
//!     println!("{} created={}", peer.id, created);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Storage-enforced uniqueness**: ids are primary keys; concurrent inserts of
//!   the same record produce exactly one `Inserted`.
//! - **No updates through merge**: get-or-create never touches an existing row.
//! - **Notify after commit**: listeners run once the write is durable and no
//!   store lock is held.

pub mod error;
pub mod listener;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use listener::{ListenerId, Listeners, MessageListener};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{InsertResult, RecordStore, RecordStoreExt};
