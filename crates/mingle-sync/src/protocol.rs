//! Anti-entropy sync protocol.
//!
//! Full-state push/pull: the responder sends its whole dump, the initiator
//! sends its own dump back and merges the one it pulled, and the responder
//! merges the push and acknowledges with a [`MergeReport`]. Merging is get-or-create per row, so
//! re-running an exchange converges without duplicating anything.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mingle_core::{MessageFields, PeerFields, RecordKind};
use mingle_store::{RecordStore, RecordStoreExt, StoreError};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::messages::{parse_reply, Command, MergeAck, Request, SyncDump, PONG};
use crate::server::Service;
use crate::transport::Connection;

/// Outcome of merging one dump into a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub peers_created: usize,
    pub peers_existing: usize,
    pub messages_created: usize,
    pub messages_existing: usize,
    /// Rows skipped because they failed to decode or validate.
    pub invalid: usize,
}

impl MergeReport {
    /// Records that did not exist before this merge.
    pub fn created(&self) -> usize {
        self.peers_created + self.messages_created
    }

    fn record(&mut self, kind: RecordKind, created: bool) {
        match (kind, created) {
            (RecordKind::Peer, true) => self.peers_created += 1,
            (RecordKind::Peer, false) => self.peers_existing += 1,
            (RecordKind::Message, true) => self.messages_created += 1,
            (RecordKind::Message, false) => self.messages_existing += 1,
        }
    }
}

/// Result of an initiated sync.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Address the exchange ran against.
    pub peer: String,
    /// What merging the peer's dump did locally.
    pub pulled: MergeReport,
    /// What merging our dump did on the peer, if it acknowledged.
    pub pushed: Option<MergeReport>,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Runs both halves of the exchange against one store.
pub struct SyncEngine<S: RecordStore> {
    store: Arc<S>,
    config: SyncConfig,
}

impl<S: RecordStore> SyncEngine<S> {
    pub fn new(store: Arc<S>, config: SyncConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Project every stored record to its hashable fields.
    pub async fn dump(&self) -> Result<SyncDump> {
        let peers = self
            .store
            .all_peers()
            .await?
            .iter()
            .map(|p| serde_json::to_value(p.fields()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let messages = self
            .store
            .all_messages()
            .await?
            .iter()
            .map(|m| serde_json::to_value(m.fields()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(SyncDump { peers, messages })
    }

    /// Merge a dump: get-or-create every valid row, skip the rest.
    ///
    /// Peers go first so a message's sender and receiver tend to land before
    /// it does; nothing depends on that order.
    pub async fn merge(&self, dump: SyncDump) -> Result<MergeReport> {
        let mut report = MergeReport::default();

        for row in dump.peers {
            let Some(fields) = decode_row::<PeerFields>(RecordKind::Peer, row, &mut report) else {
                continue;
            };
            let outcome = self.store.get_or_create_peer(fields).await;
            settle(RecordKind::Peer, outcome.map(|(_, created)| created), &mut report)?;
        }

        for row in dump.messages {
            let Some(fields) = decode_row::<MessageFields>(RecordKind::Message, row, &mut report)
            else {
                continue;
            };
            let outcome = self.store.get_or_create_message(fields).await;
            settle(RecordKind::Message, outcome.map(|(_, created)| created), &mut report)?;
        }

        Ok(report)
    }

    /// Responder half, entered after a `sync` request was read.
    pub async fn respond(&self, conn: &mut Connection) -> Result<MergeReport> {
        let peer = conn.peer_addr();

        let dump = self.dump().await?;
        conn.write_frame(&dump).await?;

        let pushed: SyncDump = parse_reply(&conn.expect_frame().await?)?;
        let report = self.merge(pushed).await?;
        conn.write_frame(&MergeAck {
            merged: report.clone(),
        })
        .await?;

        tracing::info!(%peer, sent = dump.len(), created = report.created(), "served sync");
        Ok(report)
    }

    /// Initiator half: one attempt against `addr`.
    pub async fn initiate(&self, addr: &str) -> Result<SyncReport> {
        let mut conn = Connection::connect(addr, &self.config).await?;
        conn.write_frame(&Request::sync()).await?;

        let remote: SyncDump = parse_reply(&conn.expect_frame().await?)?;

        // Push before merging the pull: the responder is waiting on it under
        // its read timeout, and our merge may run handlers.
        let dump = self.dump().await?;
        conn.write_frame(&dump).await?;

        let pulled = self.merge(remote).await?;

        let pushed = match conn.read_frame().await? {
            Some(frame) => Some(parse_reply::<MergeAck>(&frame)?.merged),
            None => {
                tracing::warn!(%addr, "peer closed without acknowledging push");
                None
            }
        };

        if let Err(e) = conn.shutdown().await {
            tracing::debug!(%addr, error = %e, "shutdown failed");
        }

        Ok(SyncReport {
            peer: addr.to_string(),
            pulled,
            pushed,
            attempts: 1,
        })
    }

    /// Sync with `addr`, retrying transient failures with doubling backoff.
    pub async fn sync_with(&self, addr: &str) -> Result<SyncReport> {
        let attempts = self.config.retry_attempts.max(1);
        let mut backoff = self.config.retry_backoff;
        let mut attempt = 1;

        loop {
            match self.initiate(addr).await {
                Ok(mut report) => {
                    report.attempts = attempt;
                    tracing::info!(
                        %addr,
                        pulled = report.pulled.created(),
                        pushed = ?report.pushed.as_ref().map(MergeReport::created),
                        "sync complete"
                    );
                    return Ok(report);
                }
                Err(e) if attempt < attempts && e.is_retryable() => {
                    tracing::warn!(%addr, attempt, error = %e, "sync failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn decode_row<T: serde::de::DeserializeOwned>(
    kind: RecordKind,
    row: Value,
    report: &mut MergeReport,
) -> Option<T> {
    match serde_json::from_value(row) {
        Ok(fields) => Some(fields),
        Err(e) => {
            tracing::warn!(%kind, error = %e, "skipping undecodable row");
            report.invalid += 1;
            None
        }
    }
}

fn settle(
    kind: RecordKind,
    outcome: std::result::Result<bool, StoreError>,
    report: &mut MergeReport,
) -> Result<()> {
    match outcome {
        Ok(created) => {
            report.record(kind, created);
            Ok(())
        }
        Err(StoreError::Record(e)) => {
            tracing::warn!(%kind, error = %e, "skipping invalid row");
            report.invalid += 1;
            Ok(())
        }
        Err(e) => Err(SyncError::Store(e)),
    }
}

/// The command table served by a node: `ping` and the responder half of `sync`.
pub struct SyncService<S: RecordStore> {
    engine: Arc<SyncEngine<S>>,
}

impl<S: RecordStore> SyncService<S> {
    pub fn new(engine: Arc<SyncEngine<S>>) -> Self {
        Self { engine }
    }
}

#[async_trait::async_trait]
impl<S: RecordStore + 'static> Service for SyncService<S> {
    async fn call(&self, command: Command, conn: &mut Connection) -> Result<()> {
        match command {
            Command::Ping => conn.write_line(PONG).await,
            Command::Sync(hint) => {
                if !hint.is_empty() {
                    tracing::debug!(?hint, "ignoring sync hint");
                }
                self.engine.respond(conn).await.map(|_| ())
            }
        }
    }
}
