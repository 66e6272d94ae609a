//! Key checksums
//!
//! A checksum fingerprints the semantic identity of a key: the fields that
//! must agree between two copies of the same key on different devices.
//! Machine-local state (installation flag, public key path, rotation
//! bookkeeping) and `updated_at` are excluded.

use crate::models::Key;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Canonical form hashed by [`compute_checksum`]. Field order is fixed.
#[derive(Serialize)]
struct CanonicalKey<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    key_type: &'a str,
    fingerprint: &'a str,
    path: &'a str,
    comment: &'a str,
    tags: &'a [String],
    created_at: &'a DateTime<Utc>,
}

/// Compute the SHA-256 checksum (lowercase hex) of a key's qualifying fields
pub fn compute_checksum(key: &Key) -> String {
    let canonical = CanonicalKey {
        name: &key.name,
        key_type: key.key_type.as_str(),
        fingerprint: &key.fingerprint,
        path: &key.path,
        comment: &key.comment,
        tags: &key.tags,
        created_at: &key.created_at,
    };

    let data = serde_json::to_vec(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&data);
    hex::encode(hasher.finalize())
}
