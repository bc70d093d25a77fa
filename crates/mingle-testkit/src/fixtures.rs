//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use mingle::{DeliveryError, Node, NodeConfig, ReceiveMessage};
use mingle_core::{Message, RecordId};
use mingle_store::{MemoryStore, RecordStore};
use mingle_sync::SyncConfig;

/// Delivery handler that records every message it is given.
#[derive(Default)]
pub struct RecordingHandler {
    received: Mutex<Vec<Message>>,
}

impl RecordingHandler {
    pub fn messages(&self) -> Vec<Message> {
        self.received.lock().expect("handler lock poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().expect("handler lock poisoned").len()
    }
}

#[async_trait]
impl ReceiveMessage for RecordingHandler {
    async fn receive_message(&self, message: &Message) -> Result<(), DeliveryError> {
        self.received
            .lock()
            .map_err(|e| DeliveryError::Rejected(e.to_string()))?
            .push(message.clone());
        Ok(())
    }
}

/// A started node on loopback with a [`RecordingHandler`].
pub struct TestNode<S: RecordStore + 'static = MemoryStore> {
    pub node: Node<S>,
    pub handler: Arc<RecordingHandler>,
    pub addr: SocketAddr,
}

impl TestNode<MemoryStore> {
    /// Start an in-memory node named `name` on a free loopback port.
    pub async fn spawn(name: &str) -> Self {
        Self::spawn_with(name, Arc::new(MemoryStore::new()), test_sync_config()).await
    }
}

impl<S: RecordStore + 'static> TestNode<S> {
    /// Start a node over `store` with the given sync configuration.
    pub async fn spawn_with(name: &str, store: Arc<S>, sync: SyncConfig) -> Self {
        let config = NodeConfig::default()
            .with_name(name)
            .with_host("127.0.0.1")
            .with_port(free_port())
            .with_sync(sync);

        let handler = Arc::new(RecordingHandler::default());
        let node = Node::open(config, store, handler.clone())
            .await
            .expect("open test node");
        let addr = node.start().await.expect("start test node");

        Self {
            node,
            handler,
            addr,
        }
    }

    /// Address other nodes sync against.
    pub fn connection(&self) -> String {
        self.addr.to_string()
    }

    pub fn id(&self) -> RecordId {
        self.node.me().id
    }
}

impl<S: RecordStore + 'static> Deref for TestNode<S> {
    type Target = Node<S>;

    fn deref(&self) -> &Node<S> {
        &self.node
    }
}

/// Sync configuration with timeouts short enough for tests.
pub fn test_sync_config() -> SyncConfig {
    SyncConfig {
        connect_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(5),
        ..SyncConfig::default()
    }
}

/// A loopback port that was free a moment ago.
///
/// A node advertises its configured port in its own Peer record, so tests
/// pick a concrete port instead of binding port 0.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("no free loopback port")
}

/// Send one raw line to `addr` and return the reply line.
pub async fn raw_request(addr: SocketAddr, line: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(line).await.expect("write request");
    stream.shutdown().await.expect("close write half");

    let mut reply = String::new();
    BufReader::new(stream)
        .read_line(&mut reply)
        .await
        .expect("read reply");
    reply
}

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
