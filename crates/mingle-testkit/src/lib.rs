//! # Mingle Testkit
//!
//! Testing utilities for Mingle.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: running nodes on loopback and a recording delivery handler
//! - **Generators**: Proptest strategies for record fields and sync dumps
//!
//! The end-to-end tests live in `tests/`.
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use mingle_core::Peer;
//! use mingle_testkit::generators::peer_fields;
//!
//! proptest! {
//!     #[test]
//!     fn peer_id_is_deterministic(fields in peer_fields()) {
//!         let a = Peer::from_fields(fields.clone()).unwrap();
//!         let b = Peer::from_fields(fields).unwrap();
//!         prop_assert_eq!(a.id, b.id);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use mingle_testkit::fixtures::TestNode;
//!
//! async fn example() {
//!     let alice = TestNode::spawn("alice").await;
//!     let bob = TestNode::spawn("bob").await;
//!     alice.sync_with(&bob.connection()).await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{init_tracing, raw_request, RecordingHandler, TestNode};
