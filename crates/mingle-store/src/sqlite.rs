//! SQLite implementation of the RecordStore trait.
//!
//! This is the primary storage backend for Mingle. It uses rusqlite with
//! bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use mingle_core::{Message, Peer, RecordId, RecordKind};

use crate::error::{Result, StoreError};
use crate::listener::{ListenerId, Listeners, MessageListener};
use crate::migration::{self, now_millis};
use crate::traits::{InsertResult, RecordStore};

const PEER_COLUMNS: &str = "id, name, connection";
const MESSAGE_COLUMNS: &str = "id, sender, receiver, message, received";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
    listeners: Listeners,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened sqlite store");
        Self::with_connection(conn)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            listeners: Listeners::new(),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

// Helpers to convert rows to records

fn column_id(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<RecordId> {
    let hex: String = row.get(idx)?;
    RecordId::from_hex(&hex)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_peer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Peer> {
    Ok(Peer {
        id: column_id(row, 0)?,
        name: row.get(1)?,
        connection: row.get(2)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: column_id(row, 0)?,
        sender: column_id(row, 1)?,
        receiver: column_id(row, 2)?,
        message: row.get(3)?,
        received: row.get(4)?,
    })
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert_peer(&self, peer: &Peer) -> Result<InsertResult> {
        let peer = peer.clone();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            // The primary key decides; a concurrent duplicate is ignored, not raced.
            let changed = tx.execute(
                "INSERT OR IGNORE INTO peers (id, name, connection, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![peer.id.to_hex(), peer.name, peer.connection, now_millis()],
            )?;
            tx.commit()?;

            Ok(if changed == 1 {
                InsertResult::Inserted
            } else {
                InsertResult::AlreadyExists
            })
        })
        .await
    }

    async fn get_peer(&self, id: &RecordId) -> Result<Option<Peer>> {
        let id = id.to_hex();

        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {PEER_COLUMNS} FROM peers WHERE id = ?1"),
                params![id],
                row_to_peer,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn find_peers_by_name(&self, name: &str) -> Result<Vec<Peer>> {
        let name = name.to_string();

        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PEER_COLUMNS} FROM peers WHERE name = ?1 ORDER BY rowid"
            ))?;
            let peers = stmt
                .query_map(params![name], row_to_peer)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(peers)
        })
        .await
    }

    async fn all_peers(&self) -> Result<Vec<Peer>> {
        self.blocking(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {PEER_COLUMNS} FROM peers ORDER BY rowid"))?;
            let peers = stmt
                .query_map([], row_to_peer)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(peers)
        })
        .await
    }

    async fn insert_message(&self, message: &Message) -> Result<InsertResult> {
        let row = message.clone();

        let result = self
            .blocking(move |conn| {
                let tx = conn.transaction()?;
                let changed = tx.execute(
                    "INSERT OR IGNORE INTO messages
                        (id, sender, receiver, message, received, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        row.id.to_hex(),
                        row.sender.to_hex(),
                        row.receiver.to_hex(),
                        row.message,
                        row.received,
                        now_millis(),
                    ],
                )?;
                tx.commit()?;

                Ok(if changed == 1 {
                    InsertResult::Inserted
                } else {
                    InsertResult::AlreadyExists
                })
            })
            .await?;

        // Committed and the connection lock is released.
        if result.is_inserted() {
            self.listeners.notify_created(message).await;
        }

        Ok(result)
    }

    async fn get_message(&self, id: &RecordId) -> Result<Option<Message>> {
        let id = id.to_hex();

        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn messages_for(&self, receiver: &RecordId) -> Result<Vec<Message>> {
        let receiver = receiver.to_hex();

        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE receiver = ?1 ORDER BY rowid"
            ))?;
            let messages = stmt
                .query_map(params![receiver], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(messages)
        })
        .await
    }

    async fn all_messages(&self) -> Result<Vec<Message>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY rowid"
            ))?;
            let messages = stmt
                .query_map([], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(messages)
        })
        .await
    }

    async fn mark_received(&self, id: &RecordId) -> Result<bool> {
        let id = id.to_hex();

        self.blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET received = 1 WHERE id = ?1",
                params![id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn count(&self, kind: RecordKind) -> Result<usize> {
        let sql = match kind {
            RecordKind::Peer => "SELECT COUNT(*) FROM peers",
            RecordKind::Message => "SELECT COUNT(*) FROM messages",
        };

        self.blocking(move |conn| {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        })
        .await
    }

    fn subscribe(&self, listener: Arc<dyn MessageListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}
