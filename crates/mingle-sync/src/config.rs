//! Transport and sync tuning.

use std::time::Duration;

/// Configuration for connections and sync exchanges.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Timeout for establishing an outbound connection.
    pub connect_timeout: Duration,
    /// Timeout for waiting on a single frame from the peer.
    pub read_timeout: Duration,
    /// Timeout for handing one frame to a peer that has stopped reading.
    pub write_timeout: Duration,
    /// Largest accepted frame, excluding the terminator.
    pub max_frame_len: usize,
    /// Total attempts for `sync_with` (1 = no retry).
    pub retry_attempts: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub retry_backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            max_frame_len: 16 * 1024 * 1024,
            retry_attempts: 1,
            retry_backoff: Duration::from_millis(200),
        }
    }
}
