//! Error types for the node.

use mingle_core::CoreError;
use mingle_store::StoreError;
use mingle_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Record validation error.
    #[error("record error: {0}")]
    Record(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Binding or inspecting the listening socket failed.
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Errors raised while handing a message to the application.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The application did not provide `receive_message`.
    #[error("receive_message is not implemented")]
    Unimplemented,

    /// The application refused or failed to take the message.
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
