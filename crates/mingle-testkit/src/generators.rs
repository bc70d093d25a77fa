//! Proptest generators for property-based testing.

use proptest::prelude::*;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};

use mingle_core::{MessageFields, PeerFields, RecordId};
use mingle_sync::SyncDump;

/// Generate a random RecordId.
pub fn record_id() -> impl Strategy<Value = RecordId> {
    any::<[u8; 32]>().prop_map(RecordId::from_bytes)
}

/// Generate a non-empty peer name.
pub fn peer_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,15}"
}

/// Generate a `host:port` connection string.
pub fn connection() -> impl Strategy<Value = String> {
    (prop_oneof![Just("localhost"), Just("127.0.0.1"), Just("node.example")], any::<u16>())
        .prop_map(|(host, port)| format!("{host}:{port}"))
}

/// Generate valid peer fields.
pub fn peer_fields() -> impl Strategy<Value = PeerFields> {
    (peer_name(), connection()).prop_map(|(name, connection)| PeerFields { name, connection })
}

/// Generate message text, including empty and non-ASCII payloads.
pub fn message_text() -> impl Strategy<Value = String> {
    prop_oneof![Just(String::new()), "[ -~]{1,40}", "\\PC{1,10}"]
}

/// Generate message fields.
pub fn message_fields() -> impl Strategy<Value = MessageFields> {
    (record_id(), record_id(), message_text()).prop_map(|(sender, receiver, message)| {
        MessageFields {
            sender,
            receiver,
            message,
        }
    })
}

/// Generate a row that fails to decode or validate.
pub fn invalid_peer_row() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(json!(null)),
        Just(json!({"name": "", "connection": "localhost:1"})),
        peer_name().prop_map(|name| json!({"name": name, "connection": "no-port"})),
        peer_name().prop_map(|name| json!({"name": name})),
    ]
}

/// Generate a sync dump with valid rows, some duplicated, and a few bad ones.
pub fn sync_dump() -> impl Strategy<Value = SyncDump> {
    (
        prop::collection::vec(peer_fields(), 0..6),
        prop::collection::vec(message_fields(), 0..6),
        prop::collection::vec(invalid_peer_row(), 0..3),
        any::<bool>(),
    )
        .prop_map(|(peers, messages, invalid, duplicate)| {
            let mut dump = SyncDump {
                peers: peers.iter().map(|p| json!(p)).collect(),
                messages: messages.iter().map(|m| json!(m)).collect(),
            };
            if duplicate {
                let copies = dump.messages.clone();
                dump.messages.extend(copies);
            }
            dump.peers.extend(invalid);
            dump
        })
}

/// Random alphanumeric message text, for tests that want unique payloads.
pub fn random_text(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mingle_core::{Message, Peer, RecordKind};
    use mingle_store::{MemoryStore, RecordStore};
    use mingle_sync::{state_digest, SyncConfig, SyncEngine};
    use std::sync::Arc;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
    }

    proptest! {
        #[test]
        fn prop_peer_identity_deterministic(fields in peer_fields()) {
            let a = Peer::from_fields(fields.clone()).unwrap();
            let b = Peer::from_fields(fields).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_message_identity_ignores_received(fields in message_fields()) {
            let mut a = Message::from_fields(fields.clone()).unwrap();
            a.received = true;
            let b = Message::from_fields(fields).unwrap();
            prop_assert_eq!(a.id, b.id);
        }

        #[test]
        fn prop_merge_replay_is_idempotent(dump in sync_dump(), replays in 1usize..4) {
            runtime().block_on(async {
                let engine = SyncEngine::new(Arc::new(MemoryStore::new()), SyncConfig::default());

                let first = engine.merge(dump.clone()).await.unwrap();
                let digest = state_digest(engine.store().as_ref()).await.unwrap();
                let peers = engine.store().count(RecordKind::Peer).await.unwrap();
                let messages = engine.store().count(RecordKind::Message).await.unwrap();
                prop_assert_eq!(peers, first.peers_created);
                prop_assert_eq!(messages, first.messages_created);

                for _ in 0..replays {
                    let again = engine.merge(dump.clone()).await.unwrap();
                    prop_assert_eq!(again.created(), 0);
                    prop_assert_eq!(again.invalid, first.invalid);
                }

                prop_assert_eq!(state_digest(engine.store().as_ref()).await.unwrap(), digest);
                Ok(())
            })?;
        }
    }

    #[test]
    fn test_random_text() {
        let a = random_text(24);
        assert_eq!(a.len(), 24);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, random_text(24));
    }
}
