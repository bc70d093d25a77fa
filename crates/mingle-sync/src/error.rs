//! Error types for the sync module.

use thiserror::Error;

/// Errors caused by a peer speaking the protocol wrong.
///
/// Always recovered at the connection boundary and reported back to the
/// caller as an error frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("request has no command")]
    MissingCommand,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid arguments for {command}: {reason}")]
    InvalidArgs { command: String, reason: String },

    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    #[error("connection closed mid-frame")]
    UnexpectedEof,
}

impl ProtocolError {
    /// Stable code carried in error frames.
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "malformed",
            ProtocolError::MissingCommand => "missing_command",
            ProtocolError::UnknownCommand(_) => "unknown_command",
            ProtocolError::InvalidArgs { .. } => "invalid_args",
            ProtocolError::FrameTooLarge { .. } => "frame_too_large",
            ProtocolError::UnexpectedEof => "unexpected_eof",
        }
    }
}

/// Errors that can occur during RPC and sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The peer violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Could not reach the peer.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Socket-level failure on an established connection.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Timeout waiting for peer.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] mingle_store::StoreError),

    /// Encoding an outbound frame failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Peer answered with an error frame.
    #[error("peer error ({code}): {message}")]
    PeerError { code: String, message: String },

    /// Sync was cancelled because the node is stopping.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Code sent in an error frame when this error ends a request.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Protocol(e) => e.code(),
            SyncError::Timeout(_) => "timeout",
            _ => "internal",
        }
    }

    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Connect { .. } | SyncError::Transport(_) | SyncError::Timeout(_)
        )
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
