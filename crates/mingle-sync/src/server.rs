//! RPC server: accept loop and per-connection dispatch.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::messages::{Command, ErrorFrame, Request};
use crate::transport::Connection;

/// Handler for resolved commands.
///
/// The service owns the connection for the rest of the exchange and may
/// read and write as many frames as its command needs.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    async fn call(&self, command: Command, conn: &mut Connection) -> Result<()>;
}

/// TCP server handling one request per connection, each on its own task.
pub struct RpcServer<H: Service> {
    listener: TcpListener,
    service: Arc<H>,
    config: SyncConfig,
}

impl<H: Service> RpcServer<H> {
    /// Bind the listening socket. Port 0 picks a free port.
    pub async fn bind(addr: impl ToSocketAddrs, service: Arc<H>, config: SyncConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            service,
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` turns true or its sender is dropped.
    ///
    /// On shutdown the listener is closed and in-flight handlers are aborted.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        let addr = self.local_addr().ok();
        let mut connections = JoinSet::new();
        tracing::info!(?addr, "rpc server listening");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "accepted connection");
                        connections.spawn(handle_connection(
                            stream,
                            Arc::clone(&self.service),
                            self.config.clone(),
                        ));
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(error = %e, "connection handler panicked");
                        }
                    }
                }
            }
        }

        drop(self.listener);
        let in_flight = connections.len();
        connections.shutdown().await;
        tracing::info!(?addr, in_flight, "rpc server stopped");
    }
}

async fn handle_connection<H: Service>(stream: TcpStream, service: Arc<H>, config: SyncConfig) {
    let mut conn = match Connection::new(stream, &config) {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(error = %e, "dropping connection");
            return;
        }
    };
    let peer = conn.peer_addr();

    if let Err(e) = dispatch(&mut conn, service.as_ref()).await {
        tracing::warn!(%peer, error = %e, "request failed");
        if let Err(write_err) = conn.write_frame(&ErrorFrame::from(&e)).await {
            tracing::debug!(%peer, error = %write_err, "could not report error to peer");
        }
    }

    if let Err(e) = conn.shutdown().await {
        tracing::debug!(%peer, error = %e, "shutdown failed");
    }
}

async fn dispatch<H: Service>(conn: &mut Connection, service: &H) -> Result<()> {
    let Some(frame) = conn.read_frame().await? else {
        tracing::debug!(peer = %conn.peer_addr(), "closed without a request");
        return Ok(());
    };

    let command = Command::from_request(Request::parse(&frame)?)?;
    tracing::debug!(peer = %conn.peer_addr(), command = command.name(), "dispatching");
    service.call(command, conn).await
}
