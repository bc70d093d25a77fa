//! Run a Mingle node from the environment.
//!
//! ```text
//! MINGLE_NAME=alice MINGLE_PORT=1111 MINGLE_DB=alice.db mingle-node [host:port ...]
//! ```
//!
//! Syncs once with every address given on the command line, then serves
//! until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use mingle::store::SqliteStore;
use mingle::{DeliveryError, Message, Node, NodeConfig, ReceiveMessage};

/// Prints every message addressed to this node.
struct LogHandler;

#[async_trait]
impl ReceiveMessage for LogHandler {
    async fn receive_message(&self, message: &Message) -> Result<(), DeliveryError> {
        tracing::info!(from = %message.sender, id = %message.id, text = %message.message, "received message");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,mingle=debug")),
        )
        .init();

    let config = NodeConfig::from_env()?;
    let store = match &config.database {
        Some(path) => SqliteStore::open(path)
            .with_context(|| format!("opening database {}", path.display()))?,
        None => SqliteStore::open_memory()?,
    };

    let node = Node::open(config, Arc::new(store), Arc::new(LogHandler)).await?;
    let addr = node.start().await.context("starting rpc server")?;
    tracing::info!(%addr, id = %node.me().id, name = %node.me().name, "mingle node up");

    for peer in std::env::args().skip(1) {
        match node.sync_with(&peer).await {
            Ok(report) => tracing::info!(
                %peer,
                pulled = report.pulled.created(),
                pushed = ?report.pushed.map(|r| r.created()),
                "synced"
            ),
            Err(e) => tracing::warn!(%peer, error = %e, "sync failed"),
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    node.stop().await;

    Ok(())
}
