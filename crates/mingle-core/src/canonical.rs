//! Canonical encoding of hashable fields and content-hash identity.
//!
//! A record's identity is derived only from its hashable fields:
//! - Fields are ordered by field name (lexicographic byte order)
//! - Their values are written as a compact JSON array in that order
//! - The array is hashed with Blake3 under a per-kind domain prefix
//!
//! The encoding is what makes merge conflict-free: two nodes that create the
//! same logical record independently end up with the same primary key.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::record::RecordKind;
use crate::types::RecordId;

/// Domain separator prepended to every identity hash.
pub const ID_DOMAIN: &[u8] = b"mingle-record-v0:";

/// A set of fields that determines a record's identity.
///
/// Implementors must serialize to a flat JSON object.
pub trait Hashable: Serialize {
    /// The record kind these fields belong to.
    const KIND: RecordKind;
}

/// Encode hashable fields to their canonical bytes.
///
/// Format: JSON array of field values, ordered by field name.
pub fn canonical_bytes<T: Hashable>(fields: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(fields).map_err(|e| CoreError::Encoding(e.to_string()))?;

    let Value::Object(map) = value else {
        return Err(CoreError::Encoding(format!(
            "{} fields must encode as an object",
            T::KIND
        )));
    };

    // Collect explicitly so ordering never depends on serde_json's map feature flags.
    let sorted: BTreeMap<String, Value> = map.into_iter().collect();
    let values: Vec<Value> = sorted.into_values().collect();

    serde_json::to_vec(&values).map_err(|e| CoreError::Encoding(e.to_string()))
}

/// Compute the content-hash identity of a record.
pub fn compute_id<T: Hashable>(fields: &T) -> Result<RecordId> {
    let bytes = canonical_bytes(fields)?;

    let mut hasher = blake3::Hasher::new();
    hasher.update(ID_DOMAIN);
    hasher.update(T::KIND.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(&bytes);

    Ok(RecordId(*hasher.finalize().as_bytes()))
}
