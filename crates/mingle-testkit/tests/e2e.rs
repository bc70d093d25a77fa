//! End-to-end tests: real nodes talking over loopback TCP.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mingle::sync::{ProtocolError, SyncConfig, SyncError};
use mingle::{
    DeliveryError, Message, Node, NodeConfig, NodeError, PeerFields, ReceiveMessage, RecordId,
    RecordKind,
};
use mingle_store::{MemoryStore, RecordStore, RecordStoreExt, SqliteStore};
use mingle_testkit::fixtures::{free_port, test_sync_config};
use mingle_testkit::generators::random_text;
use mingle_testkit::{init_tracing, raw_request, TestNode};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const PING: &[u8] = b"{\"command\":\"ping\"}\n";

// ─────────────────────────────────────────────────────────────────────────────
// RPC
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_ping() {
    init_tracing();
    let node = TestNode::spawn("pinger").await;

    assert_eq!(raw_request(node.addr, PING).await, "pong\n");
}

#[tokio::test]
async fn test_bad_requests_get_error_frames() -> anyhow::Result<()> {
    init_tracing();
    let node = TestNode::spawn("robust").await;

    let cases: [(&[u8], &str); 4] = [
        (b"junkgarbagebasura\n", "malformed"),
        (b"{\"args\":[]}\n", "missing_command"),
        (b"{\"command\":\"sup mang?\"}\n", "unknown_command"),
        (b"{\"command\":\"ping\",\"args\":[1,2]}\n", "invalid_args"),
    ];

    for (line, code) in cases {
        let reply = raw_request(node.addr, line).await;
        let frame: serde_json::Value = serde_json::from_str(&reply)?;
        assert_eq!(frame["error"]["code"], code, "reply to {:?}", String::from_utf8_lossy(line));
        assert!(reply.ends_with('\n'));
    }

    // Still serving.
    assert_eq!(raw_request(node.addr, PING).await, "pong\n");
    Ok(())
}

#[tokio::test]
async fn test_truncated_request() -> anyhow::Result<()> {
    let node = TestNode::spawn("eof").await;

    let reply = raw_request(node.addr, b"{\"command\":").await;
    let frame: serde_json::Value = serde_json::from_str(&reply)?;
    assert_eq!(frame["error"]["code"], "unexpected_eof");
    Ok(())
}

#[tokio::test]
async fn test_request_split_across_writes() {
    let node = TestNode::spawn("split").await;

    let mut stream = TcpStream::connect(node.addr).await.unwrap();
    for chunk in [&b"{\"comm"[..], b"and\":\"pi", b"ng\"}\n"] {
        stream.write_all(chunk).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply).await.unwrap();
    assert_eq!(reply, "pong\n");
}

// ─────────────────────────────────────────────────────────────────────────────
// Sync
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_pull_delivers_once() -> anyhow::Result<()> {
    init_tracing();
    let a = TestNode::spawn("a").await;
    let b = TestNode::spawn("b").await;

    // B knows A and has a message for it; A knows nothing.
    b.store().get_or_create_peer(a.me().fields()).await?;
    let hi = b.send_message(&a.id(), "hi").await?;

    let report = a.sync_with(&b.connection()).await?;
    assert_eq!(report.pulled.peers_created, 1);
    assert_eq!(report.pulled.peers_existing, 1);
    assert_eq!(report.pulled.messages_created, 1);
    assert_eq!(report.pushed.map(|r| r.created()), Some(0));

    assert_eq!(a.store().count(RecordKind::Peer).await?, 2);
    assert_eq!(a.store().count(RecordKind::Message).await?, 1);
    assert_eq!(a.handler.count(), 1);
    assert_eq!(a.handler.messages()[0].id, hi.id);
    assert!(a.store().get_message(&hi.id).await?.map_or(false, |m| m.received));
    assert_eq!(b.handler.count(), 0);

    // Replaying changes nothing and delivers nothing.
    let again = a.sync_with(&b.connection()).await?;
    assert_eq!(again.pulled.created(), 0);
    assert_eq!(a.store().count(RecordKind::Peer).await?, 2);
    assert_eq!(a.store().count(RecordKind::Message).await?, 1);
    assert_eq!(b.store().count(RecordKind::Message).await?, 1);
    assert_eq!(a.handler.count(), 1);

    Ok(())
}

#[tokio::test]
async fn test_bidirectional_convergence() -> anyhow::Result<()> {
    let a = TestNode::spawn("a").await;
    let b = TestNode::spawn("b").await;

    a.send_message(&b.id(), "from a").await?;
    b.send_message(&a.id(), "from b").await?;
    a.send_message(&a.id(), random_text(16)).await?;
    assert_ne!(a.state_digest().await?, b.state_digest().await?);

    let report = a.sync_with(&b.connection()).await?;
    assert_eq!(report.pulled.messages_created, 1);
    assert_eq!(report.pushed.as_ref().map(|r| r.messages_created), Some(2));

    assert_eq!(a.state_digest().await?, b.state_digest().await?);
    assert_eq!(a.store().count(RecordKind::Peer).await?, 2);
    assert_eq!(b.store().count(RecordKind::Message).await?, 3);

    // Each node was handed exactly the message addressed to it from the other.
    assert_eq!(b.handler.count(), 1);
    assert_eq!(b.handler.messages()[0].message, "from a");
    assert_eq!(a.handler.count(), 2);

    Ok(())
}

#[tokio::test]
async fn test_three_nodes_converge_through_middle() -> anyhow::Result<()> {
    let a = TestNode::spawn("a").await;
    let b = TestNode::spawn("b").await;
    let c = TestNode::spawn("c").await;

    a.send_message(&c.id(), "relay me").await?;

    a.sync_with(&b.connection()).await?;
    c.sync_with(&b.connection()).await?;

    assert_eq!(c.handler.count(), 1);
    assert_eq!(c.handler.messages()[0].message, "relay me");
    assert_eq!(b.state_digest().await?, c.state_digest().await?);
    Ok(())
}

#[tokio::test]
async fn test_sync_between_sqlite_nodes() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let a = TestNode::spawn_with(
        "a",
        Arc::new(SqliteStore::open(dir.path().join("a.db"))?),
        test_sync_config(),
    )
    .await;
    let b = TestNode::spawn_with(
        "b",
        Arc::new(SqliteStore::open(dir.path().join("b.db"))?),
        test_sync_config(),
    )
    .await;

    for i in 0..20 {
        b.send_message(&a.id(), format!("message {i}")).await?;
    }
    a.sync_with(&b.connection()).await?;

    assert_eq!(a.handler.count(), 20);
    assert_eq!(a.store().messages_for(&a.id()).await?.len(), 20);
    assert!(a.store().all_messages().await?.iter().all(|m| m.received));
    assert_eq!(a.state_digest().await?, b.state_digest().await?);
    Ok(())
}

#[tokio::test]
async fn test_responder_skips_invalid_peer_rows() -> anyhow::Result<()> {
    let a = TestNode::spawn("a").await;
    let b = TestNode::spawn("b").await;

    // An invalid peer can't be created through the store, so push one by hand.
    let mut stream = TcpStream::connect(b.addr).await?;
    stream.write_all(b"{\"command\":\"sync\",\"args\":[]}\n").await?;
    let mut reader = BufReader::new(stream);
    let mut dump = String::new();
    reader.read_line(&mut dump).await?;

    let pushed = serde_json::json!({
        "Peer": [a.me().fields(), {"name": "", "connection": "x:1"}],
        "Message": [],
    });
    reader.get_mut().write_all(format!("{pushed}\n").as_bytes()).await?;

    let mut ack = String::new();
    reader.read_line(&mut ack).await?;
    let ack: serde_json::Value = serde_json::from_str(&ack)?;
    assert_eq!(ack["merged"]["peers_created"], 1);
    assert_eq!(ack["merged"]["invalid"], 1);

    assert_eq!(
        b.store().find_peers_by_name("a").await?,
        vec![a.me().clone()]
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure handling
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unreachable_peer_is_recoverable() {
    let a = TestNode::spawn("a").await;
    let nowhere = format!("127.0.0.1:{}", free_port());

    let err = a.sync_with(&nowhere).await.unwrap_err();
    assert!(matches!(err, NodeError::Sync(SyncError::Connect { .. })), "{err}");

    assert_eq!(raw_request(a.addr, PING).await, "pong\n");
}

#[tokio::test]
async fn test_silent_peer_times_out() {
    let sync = SyncConfig {
        read_timeout: Duration::from_millis(200),
        ..test_sync_config()
    };
    let a = TestNode::spawn_with("a", Arc::new(MemoryStore::new()), sync).await;
    let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let err = a
        .sync_with(&silent.local_addr().unwrap().to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::Sync(SyncError::Timeout(_))), "{err}");
}

/// Accept one connection, read its request, answer with `reply`, then wait
/// for the client to hang up.
async fn fake_peer(listener: TcpListener, reply: &'static [u8]) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut reader = BufReader::new(stream);
    let mut request = String::new();
    reader.read_line(&mut request).await.unwrap();
    reader.get_mut().write_all(reply).await.unwrap();

    let mut rest = Vec::new();
    let _ = reader.read_to_end(&mut rest).await;
}

#[tokio::test]
async fn test_peer_error_frame_surfaces() {
    let a = TestNode::spawn("a").await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(fake_peer(
        listener,
        b"{\"error\":{\"code\":\"unknown_command\",\"message\":\"no sync here\"}}\n",
    ));

    match a.sync_with(&addr.to_string()).await {
        Err(NodeError::Sync(SyncError::PeerError { code, .. })) => {
            assert_eq!(code, "unknown_command")
        }
        other => panic!("expected peer error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_garbage_dump_is_protocol_error() {
    let a = TestNode::spawn("a").await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(fake_peer(listener, b"not json\n"));

    let err = a.sync_with(&addr.to_string()).await.unwrap_err();
    assert!(
        matches!(err, NodeError::Sync(SyncError::Protocol(ProtocolError::Malformed(_)))),
        "{err}"
    );
}

#[tokio::test]
async fn test_retry_reaches_late_peer() -> anyhow::Result<()> {
    let sync = SyncConfig {
        retry_attempts: 6,
        retry_backoff: Duration::from_millis(100),
        ..test_sync_config()
    };
    let a = TestNode::spawn_with("a", Arc::new(MemoryStore::new()), sync).await;

    let port = free_port();
    let late = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let store = Arc::new(MemoryStore::new());
        store
            .get_or_create_peer(PeerFields {
                name: "late".into(),
                connection: format!("127.0.0.1:{port}"),
            })
            .await
            .unwrap();
        let engine = Arc::new(mingle::sync::SyncEngine::new(store, test_sync_config()));
        let server = mingle::sync::RpcServer::bind(
            ("127.0.0.1", port),
            Arc::new(mingle::sync::SyncService::new(engine)),
            test_sync_config(),
        )
        .await
        .unwrap();
        let (tx, rx) = tokio::sync::watch::channel(false);
        let serving = tokio::spawn(server.serve(rx));
        (tx, serving)
    });

    let report = a.sync_with(&format!("127.0.0.1:{port}")).await?;
    assert!(report.attempts > 1);
    assert_eq!(a.store().find_peers_by_name("late").await?.len(), 1);

    let (tx, serving) = late.await?;
    tx.send(true)?;
    serving.await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stop_releases_port_and_restart_rebinds() {
    let node = TestNode::spawn("cycle").await;
    assert_eq!(raw_request(node.addr, PING).await, "pong\n");

    node.stop().await;
    assert!(TcpStream::connect(node.addr).await.is_err());

    let again = node.start().await.unwrap();
    assert_eq!(again, node.addr);
    assert_eq!(raw_request(node.addr, PING).await, "pong\n");
}

#[tokio::test]
async fn test_stop_cancels_in_flight_sync() {
    let sync = SyncConfig {
        read_timeout: Duration::from_secs(30),
        ..test_sync_config()
    };
    let a = TestNode::spawn_with("a", Arc::new(MemoryStore::new()), sync).await;
    let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = silent.local_addr().unwrap().to_string();

    let (result, ()) = tokio::join!(a.sync_with(&target), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        a.stop().await;
    });

    assert!(matches!(result, Err(NodeError::Sync(SyncError::Cancelled))));
}

#[tokio::test]
async fn test_stop_aborts_stalled_connection() {
    let node = TestNode::spawn("stall").await;

    // Half a request keeps a connection task waiting on its read.
    let mut stalled = TcpStream::connect(node.addr).await.unwrap();
    stalled.write_all(b"{\"command\"").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(2), node.stop())
        .await
        .expect("stop must not wait on in-flight connections");

    let mut buf = String::new();
    let read = BufReader::new(stalled).read_line(&mut buf).await;
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_push_to_peer_that_stops_reading_times_out() -> anyhow::Result<()> {
    let sync = SyncConfig {
        read_timeout: Duration::from_millis(200),
        write_timeout: Duration::from_millis(200),
        ..test_sync_config()
    };
    let a = TestNode::spawn_with("a", Arc::new(MemoryStore::new()), sync).await;
    let elsewhere = RecordId::from_bytes([0xee; 32]);
    let filler = "x".repeat(64 * 1024);
    for i in 0..300 {
        a.send_message(&elsewhere, format!("{i} {filler}")).await?;
    }

    // Answers with an empty dump, then holds the connection without reading.
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut request = String::new();
        reader.read_line(&mut request).await.unwrap();
        reader.get_mut().write_all(b"{}\n").await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(reader);
    });

    let result = tokio::time::timeout(Duration::from_secs(5), a.sync_with(&addr.to_string())).await;
    match result {
        Ok(Err(NodeError::Sync(SyncError::Timeout(_)))) => {}
        other => panic!("expected a write timeout, got {other:?}"),
    }

    assert_eq!(raw_request(a.addr, PING).await, "pong\n");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Delivery
// ─────────────────────────────────────────────────────────────────────────────

/// Handler whose first delivery never completes; later ones succeed.
#[derive(Default)]
struct StallFirst {
    calls: AtomicUsize,
}

#[async_trait]
impl ReceiveMessage for StallFirst {
    async fn receive_message(&self, _message: &Message) -> Result<(), DeliveryError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Handler that takes `delay` per message.
struct Slow {
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl ReceiveMessage for Slow {
    async fn receive_message(&self, _message: &Message) -> Result<(), DeliveryError> {
        tokio::time::sleep(self.delay).await;
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn started_node(
    name: &str,
    store: Arc<MemoryStore>,
    handler: Arc<dyn ReceiveMessage>,
) -> anyhow::Result<Node<MemoryStore>> {
    let config = NodeConfig::default()
        .with_name(name)
        .with_host("127.0.0.1")
        .with_port(free_port())
        .with_sync(test_sync_config());
    let node = Node::open(config, store, handler).await?;
    node.start().await?;
    Ok(node)
}

#[tokio::test]
async fn test_delivery_cut_short_by_stop_resumes_on_restart() -> anyhow::Result<()> {
    let b = TestNode::spawn("b").await;
    let store = Arc::new(MemoryStore::new());
    let handler = Arc::new(StallFirst::default());
    let a = started_node("a", Arc::clone(&store), handler.clone()).await?;

    let hi = b.send_message(&a.me().id, "hi").await?;

    let b_conn = b.connection();
    let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(a.sync_with(&b_conn), async {
            while handler.calls.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            a.stop().await;
        })
    })
    .await?;
    assert!(matches!(result, Err(NodeError::Sync(SyncError::Cancelled))), "{result:?}");

    // Stored, but the handler never finished.
    let stored = store.get_message(&hi.id).await?;
    assert!(stored.is_some_and(|m| !m.received));

    a.start().await?;
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    assert!(store.get_message(&hi.id).await?.is_some_and(|m| m.received));

    a.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_slow_pull_merge_does_not_starve_responder() -> anyhow::Result<()> {
    let sync = SyncConfig {
        read_timeout: Duration::from_millis(150),
        ..test_sync_config()
    };
    let b = TestNode::spawn_with("b", Arc::new(MemoryStore::new()), sync).await;
    let handler = Arc::new(Slow {
        delay: Duration::from_millis(100),
        calls: AtomicUsize::new(0),
    });
    let a = started_node("a", Arc::new(MemoryStore::new()), handler.clone()).await?;

    for i in 0..5 {
        b.send_message(&a.me().id, format!("slow {i}")).await?;
    }

    // Merging the pull runs the handler five times, well past b's read timeout.
    let report = a.sync_with(&b.connection()).await?;
    assert_eq!(report.pulled.messages_created, 5);
    assert_eq!(report.pushed.map(|r| r.peers_created), Some(1));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
    assert_eq!(a.state_digest().await?, b.state_digest().await?);

    a.stop().await;
    Ok(())
}
