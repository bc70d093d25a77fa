//! The Node: unified API for a Mingle participant.
//!
//! A node owns its own Peer record, a shared store, the RPC server and the
//! sync engine. Messages addressed to the node reach the application through
//! the [`ReceiveMessage`] handler it was opened with.

use std::net::SocketAddr;
use std::sync::Arc;

use mingle_core::{Message, MessageFields, Peer, PeerFields, RecordId};
use mingle_store::{ListenerId, RecordStore, RecordStoreExt};
use mingle_sync::{
    state_digest, RpcServer, StateDigest, SyncEngine, SyncError, SyncReport, SyncService,
};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::NodeConfig;
use crate::delivery::{DeliveryHook, ReceiveMessage};
use crate::error::Result;

/// A running RPC server.
struct Running {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// A Mingle node.
///
/// Provides a unified API for:
/// - Serving `ping` and `sync` on the configured address
/// - Sending messages
/// - Syncing with other nodes
pub struct Node<S: RecordStore + 'static> {
    /// This node's own Peer record, fixed for the process lifetime.
    me: Peer,
    config: NodeConfig,
    store: Arc<S>,
    engine: Arc<SyncEngine<S>>,
    hook: Arc<DeliveryHook<S>>,
    /// Registration of `hook` on the store, removed on drop.
    listener: ListenerId,
    running: Mutex<Option<Running>>,
}

impl<S: RecordStore + 'static> Node<S> {
    /// Open a node: get-or-create its own Peer and register delivery.
    pub async fn open(
        config: NodeConfig,
        store: Arc<S>,
        handler: Arc<dyn ReceiveMessage>,
    ) -> Result<Self> {
        let fields = PeerFields {
            name: config.name.clone(),
            connection: config.connection(),
        };
        let (me, created) = store.get_or_create_peer(fields).await?;

        let hook = Arc::new(DeliveryHook::new(me.id, handler, Arc::downgrade(&store)));
        let listener = store.subscribe(hook.clone());

        tracing::info!(id = %me.id, name = %me.name, connection = %me.connection, created, "node opened");

        let engine = Arc::new(SyncEngine::new(Arc::clone(&store), config.sync.clone()));
        Ok(Self {
            me,
            config,
            store,
            engine,
            hook,
            listener,
            running: Mutex::new(None),
        })
    }

    /// This node's own Peer.
    pub fn me(&self) -> &Peer {
        &self.me
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Bind the configured address and serve in the background.
    ///
    /// Returns the bound address; if already running, returns it unchanged.
    /// A fresh start then redelivers messages for this node that were never
    /// marked received.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;

        if let Some(current) = running.as_ref() {
            if !current.task.is_finished() {
                return Ok(current.addr);
            }
        }

        let service = Arc::new(SyncService::new(Arc::clone(&self.engine)));
        let server = RpcServer::bind(
            (self.config.host.as_str(), self.config.port),
            service,
            self.config.sync.clone(),
        )
        .await?;
        let addr = server.local_addr()?;

        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(server.serve(rx));
        *running = Some(Running {
            addr,
            shutdown,
            task,
        });
        drop(running);

        tracing::info!(%addr, "node started");
        if let Err(e) = self.redeliver().await {
            tracing::error!(error = %e, "redelivery failed");
        }
        Ok(addr)
    }

    /// Stop serving: close the listener and abort in-flight connections.
    ///
    /// No-op when not running.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        if running.shutdown.send(true).is_err() {
            tracing::debug!("server already exited");
        }
        if let Err(e) = running.task.await {
            tracing::error!(error = %e, "server task failed");
        }

        tracing::info!(addr = %running.addr, "node stopped");
    }

    /// Address the server is bound to, if running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.addr)
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Messaging
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a message from this node to `receiver`.
    ///
    /// Sending the same payload to the same receiver again returns the
    /// existing message. A message to self is delivered immediately.
    pub async fn send_message(
        &self,
        receiver: &RecordId,
        payload: impl Into<String>,
    ) -> Result<Message> {
        let fields = MessageFields {
            sender: self.me.id,
            receiver: *receiver,
            message: payload.into(),
        };
        let (message, created) = self.store.get_or_create_message(fields).await?;
        tracing::debug!(id = %message.id, %receiver, created, "message stored");

        // Delivery to self already ran and may have flagged the row.
        if created && message.is_for(&self.me.id) {
            if let Some(stored) = self.store.get_message(&message.id).await? {
                return Ok(stored);
            }
        }

        Ok(message)
    }

    /// Offer every message for this node not yet marked received to the
    /// handler again. Returns how many are now marked.
    pub async fn redeliver(&self) -> Result<usize> {
        let pending: Vec<Message> = self
            .store
            .messages_for(&self.me.id)
            .await?
            .into_iter()
            .filter(|m| !m.received)
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let mut delivered = 0;
        for message in &pending {
            if self.hook.deliver(message).await {
                delivered += 1;
            }
        }

        tracing::info!(pending = pending.len(), delivered, "redelivered unmarked messages");
        Ok(delivered)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────────

    /// Exchange full state with the node at `addr` (`host:port`).
    ///
    /// Cancelled with [`SyncError::Cancelled`] if this node is stopped while
    /// the exchange is in flight.
    pub async fn sync_with(&self, addr: &str) -> Result<SyncReport> {
        let shutdown = self
            .running
            .lock()
            .await
            .as_ref()
            .map(|r| r.shutdown.subscribe());

        let report = match shutdown {
            Some(rx) => tokio::select! {
                result = self.engine.sync_with(addr) => result?,
                _ = stopped(rx) => return Err(SyncError::Cancelled.into()),
            },
            None => self.engine.sync_with(addr).await?,
        };

        Ok(report)
    }

    /// Digest of the local record set; equal on converged nodes.
    pub async fn state_digest(&self) -> Result<StateDigest> {
        Ok(state_digest(self.store.as_ref()).await?)
    }
}

impl<S: RecordStore + 'static> Drop for Node<S> {
    fn drop(&mut self) {
        self.store.unsubscribe(self.listener);
    }
}

/// Resolves once the node is stopped or its server handle is gone.
async fn stopped(mut rx: watch::Receiver<bool>) {
    loop {
        let stopped = *rx.borrow_and_update();
        if stopped || rx.changed().await.is_err() {
            return;
        }
    }
}
