//! Convergence verification.
//!
//! Two stores have converged when they hold the same set of records. The
//! state digest hashes the sorted ids of every kind, so equal digests mean
//! equal sets regardless of insertion order or local `received` flags.

use std::fmt;

use mingle_core::RecordKind;
use mingle_store::RecordStore;

use crate::error::Result;

/// Blake3 digest over a store's record ids.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateDigest(pub [u8; 32]);

impl StateDigest {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateDigest({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Compute the state digest of a store.
///
/// Algorithm:
/// 1. For each kind in [`RecordKind::ALL`], collect and sort its ids
/// 2. Hash: Blake3("mingle-state-v0:" || kind || count || ids...)
pub async fn state_digest<S: RecordStore + ?Sized>(store: &S) -> Result<StateDigest> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"mingle-state-v0:");

    for kind in RecordKind::ALL {
        let mut ids = match kind {
            RecordKind::Peer => store
                .all_peers()
                .await?
                .into_iter()
                .map(|p| p.id)
                .collect::<Vec<_>>(),
            RecordKind::Message => store
                .all_messages()
                .await?
                .into_iter()
                .map(|m| m.id)
                .collect(),
        };
        ids.sort();

        hasher.update(kind.as_str().as_bytes());
        hasher.update(&(ids.len() as u64).to_be_bytes());
        for id in ids {
            hasher.update(id.as_bytes());
        }
    }

    Ok(StateDigest(*hasher.finalize().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mingle_core::{Message, Peer};
    use mingle_store::MemoryStore;

    #[tokio::test]
    async fn test_digest_ignores_insertion_order_and_flags() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        let p1 = Peer::new("one", "localhost:1").unwrap();
        let p2 = Peer::new("two", "localhost:2").unwrap();
        let msg = Message::new(p1.id, p2.id, "hi").unwrap();

        a.insert_peer(&p1).await.unwrap();
        a.insert_peer(&p2).await.unwrap();
        a.insert_message(&msg).await.unwrap();

        b.insert_message(&msg).await.unwrap();
        b.insert_peer(&p2).await.unwrap();
        b.insert_peer(&p1).await.unwrap();
        b.mark_received(&msg.id).await.unwrap();

        assert_eq!(state_digest(&a).await.unwrap(), state_digest(&b).await.unwrap());
    }

    #[tokio::test]
    async fn test_digest_differs_on_missing_record() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        a.insert_peer(&Peer::new("one", "localhost:1").unwrap()).await.unwrap();

        assert_ne!(state_digest(&a).await.unwrap(), state_digest(&b).await.unwrap());
    }
}
