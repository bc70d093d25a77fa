//! Newline-framed TCP transport.
//!
//! A frame is one line of bytes terminated by `\n`; a `\r` before the
//! terminator is dropped and does not count toward the cap. Reads are capped
//! at [`SyncConfig::max_frame_len`] and bounded by
//! [`SyncConfig::read_timeout`]; a frame may arrive split across any number
//! of socket reads. Writes are bounded by [`SyncConfig::write_timeout`].

use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::SyncConfig;
use crate::error::{ProtocolError, Result, SyncError};

/// One framed TCP connection, either accepted or dialed.
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer_addr: SocketAddr,
    read_timeout: Duration,
    write_timeout: Duration,
    max_frame_len: usize,
}

impl Connection {
    /// Wrap an established stream.
    pub fn new(stream: TcpStream, config: &SyncConfig) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            peer_addr,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            max_frame_len: config.max_frame_len,
        })
    }

    /// Dial `addr` (`host:port`) within the connect timeout.
    pub async fn connect(addr: &str, config: &SyncConfig) -> Result<Self> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SyncError::Timeout(format!("connecting to {addr}")))?
            .map_err(|source| SyncError::Connect {
                addr: addr.to_string(),
                source,
            })?;

        tracing::debug!(%addr, "connected");
        Self::new(stream, config)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read the next frame without its terminator.
    ///
    /// Returns `None` if the peer closed the connection before sending
    /// anything.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        // Room for the frame, an optional `\r` and the `\n`.
        let limit = self.max_frame_len as u64 + 2;
        let mut buf = Vec::new();

        let read = timeout(
            self.read_timeout,
            (&mut self.reader).take(limit).read_until(b'\n', &mut buf),
        )
        .await
        .map_err(|_| SyncError::Timeout(format!("waiting for a frame from {}", self.peer_addr)))??;

        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            if buf.len() > self.max_frame_len {
                return Err(self.too_large());
            }
            return Ok(Some(buf));
        }

        if read == 0 {
            return Ok(None);
        }
        if read as u64 >= limit {
            return Err(self.too_large());
        }
        Err(ProtocolError::UnexpectedEof.into())
    }

    fn too_large(&self) -> SyncError {
        ProtocolError::FrameTooLarge {
            limit: self.max_frame_len,
        }
        .into()
    }

    /// Read a frame that must be present.
    pub async fn expect_frame(&mut self) -> Result<Vec<u8>> {
        self.read_frame()
            .await?
            .ok_or_else(|| ProtocolError::UnexpectedEof.into())
    }

    /// Write raw bytes as one frame.
    pub async fn write_line(&mut self, line: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(line.len() + 1);
        frame.extend_from_slice(line);
        frame.push(b'\n');

        let writer = &mut self.writer;
        timeout(self.write_timeout, async move {
            writer.write_all(&frame).await?;
            writer.flush().await
        })
        .await
        .map_err(|_| SyncError::Timeout(format!("writing a frame to {}", self.peer_addr)))??;
        Ok(())
    }

    /// Encode `value` as JSON and write it as one frame.
    pub async fn write_frame<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let encoded = serde_json::to_vec(value)?;
        self.write_line(&encoded).await
    }

    /// Close the write half.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
