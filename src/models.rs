//! Key Models - SSH key metadata tracked by the keystore
//!
//! These records are owned by the keystore and consumed read-only by the
//! sync core. Only a stable subset of fields participates in checksums
//! (see `sync::checksum`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SSH key algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    #[default]
    Ed25519,
    Rsa,
    Ecdsa,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Ed25519 => "ed25519",
            KeyType::Rsa => "rsa",
            KeyType::Ecdsa => "ecdsa",
        }
    }
}

/// SSH key with its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    /// Unique key name
    pub name: String,

    #[serde(rename = "type")]
    pub key_type: KeyType,

    /// Private key path
    pub path: String,

    /// Public key path
    pub pub_path: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// SHA256 fingerprint of the public key
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fingerprint: String,

    /// Whether this key is installed to ~/.ssh on this machine
    #[serde(default)]
    pub installed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsa_bits: Option<u32>,

    #[serde(default)]
    pub has_passphrase: bool,

    // Rotation tracking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rotated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_due_at: Option<DateTime<Utc>>,
    /// Previous key name if this key is a rotation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotated_from: Option<String>,
}

impl Key {
    /// Create a new key record stamped with the current time
    pub fn new(name: impl Into<String>, key_type: KeyType) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            key_type,
            path: String::new(),
            pub_path: String::new(),
            tags: Vec::new(),
            comment: String::new(),
            created_at: now,
            updated_at: now,
            fingerprint: String::new(),
            installed: false,
            rsa_bits: None,
            has_passphrase: false,
            last_rotated_at: None,
            rotation_due_at: None,
            rotated_from: None,
        }
    }

    /// Mark the record as modified now
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
