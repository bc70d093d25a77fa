//! # Mingle Sync
//!
//! Line-delimited JSON RPC over TCP and the anti-entropy protocol that keeps
//! peer and message stores converged.
//!
//! ## Overview
//!
//! Every request is a single JSON object terminated by `\n`:
//! `{"command": <name>, "args": [...]}`. The server handles one request per
//! connection, on its own task, and answers protocol errors with an error
//! frame instead of dropping the process.
//!
//! ## Key Properties
//!
//! - **Idempotent**: merging the same dump twice creates nothing the second time
//! - **Full replication**: each exchange ships every record, both directions
//! - **Bounded**: frames are capped and every read has a timeout
//!
//! ## Message Flow
//!
//! ```text
//! Node A (initiator)                  Node B (responder)
//!   |-------- {"command":"sync"} ----->|
//!   |<------- B's dump ----------------|   A merges (pull)
//!   |-------- A's dump --------------->|   B merges (push)
//!   |<------- {"merged": {...}} -------|
//! ```

pub mod config;
pub mod convergence;
pub mod error;
pub mod messages;
pub mod protocol;
pub mod server;
pub mod transport;

pub use config::SyncConfig;
pub use convergence::{state_digest, StateDigest};
pub use error::{ProtocolError, Result, SyncError};
pub use messages::{Command, ErrorFrame, MergeAck, Request, SyncDump, SyncHint, PONG};
pub use protocol::{MergeReport, SyncEngine, SyncReport, SyncService};
pub use server::{RpcServer, Service};
pub use transport::Connection;
