//! Sync Data Models - Incremental Synchronization Structures
//!
//! Defines the data structures exchanged between the change detector,
//! conflict resolver, change applier and history ledger.
//!
//! Data Categories:
//! - SyncStrategy: Conflict resolution policy (validated at config time)
//! - KeyChange: Create/Update/Delete events produced by diffing snapshots
//! - SyncState: A party's name -> checksum snapshot
//! - ConflictResolution: A key that diverged on both sides

use super::checksum::compute_checksum;
use crate::models::Key;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Conflict Strategy
// ============================================================================

/// Conflict resolution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SyncStrategy {
    /// Use local version (discard remote changes)
    #[serde(rename = "local")]
    LocalWins,

    /// Use remote version (discard local changes)
    #[serde(rename = "remote")]
    RemoteWins,

    /// Use whichever side was updated last (ties go to local)
    #[default]
    #[serde(rename = "newer")]
    NewerWins,

    /// Defer to the user
    #[serde(rename = "manual")]
    Manual,
}

impl SyncStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStrategy::LocalWins => "local",
            SyncStrategy::RemoteWins => "remote",
            SyncStrategy::NewerWins => "newer",
            SyncStrategy::Manual => "manual",
        }
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStrategy {
    type Err = StrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(SyncStrategy::LocalWins),
            "remote" => Ok(SyncStrategy::RemoteWins),
            "newer" => Ok(SyncStrategy::NewerWins),
            "manual" => Ok(SyncStrategy::Manual),
            _ => Err(StrategyError::Invalid(s.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StrategyError {
    #[error("Invalid strategy: {0} (use: local, remote, newer, manual)")]
    Invalid(String),
}

// ============================================================================
// Changes
// ============================================================================

/// Type of change to a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "create",
            ChangeType::Update => "update",
            ChangeType::Delete => "delete",
        }
    }

    /// Single-character marker used in history reports
    pub fn symbol(&self) -> char {
        match self {
            ChangeType::Create => '+',
            ChangeType::Update => '~',
            ChangeType::Delete => '-',
        }
    }
}

/// A change to a single key
///
/// Create and Update carry the full key. Delete carries only the name,
/// because the deleting side no longer has the rest of the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyChange {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub key_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    /// Checksum of the key after the change (empty for Delete)
    #[serde(default)]
    pub checksum: String,
}

impl KeyChange {
    pub fn create(key: Key, device_id: &str) -> Self {
        Self::upsert(ChangeType::Create, key, device_id)
    }

    pub fn update(key: Key, device_id: &str) -> Self {
        Self::upsert(ChangeType::Update, key, device_id)
    }

    pub fn delete(key_name: &str, device_id: &str) -> Self {
        Self {
            change_type: ChangeType::Delete,
            key_name: key_name.to_string(),
            key: None,
            timestamp: Utc::now(),
            device_id: device_id.to_string(),
            checksum: String::new(),
        }
    }

    fn upsert(change_type: ChangeType, key: Key, device_id: &str) -> Self {
        Self {
            change_type,
            key_name: key.name.clone(),
            checksum: compute_checksum(&key),
            key: Some(key),
            timestamp: Utc::now(),
            device_id: device_id.to_string(),
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// A party's view of its own key set at a point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub device_id: String,

    /// Key name -> checksum
    #[serde(default)]
    pub key_checksums: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,

    /// Changes emitted during this session
    #[serde(default)]
    pub changes: Vec<KeyChange>,
}

impl SyncState {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            ..Default::default()
        }
    }

    /// Build a snapshot of `keys` as seen by `device_id`
    pub fn from_keys(device_id: &str, keys: &[Key]) -> Self {
        let mut state = Self::new(device_id);
        state.rebuild(keys);
        state
    }

    /// Replace every checksum with one recomputed from `keys`
    pub fn rebuild(&mut self, keys: &[Key]) {
        self.key_checksums = keys
            .iter()
            .map(|key| (key.name.clone(), compute_checksum(key)))
            .collect();
        self.last_sync_time = Some(Utc::now());
    }

    pub fn checksum(&self, key_name: &str) -> Option<&str> {
        self.key_checksums.get(key_name).map(String::as_str)
    }
}

// ============================================================================
// Conflicts
// ============================================================================

/// A key present on both sides with differing checksums
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub key_name: String,
    pub local_key: Key,
    pub remote_key: Key,
    pub strategy: SyncStrategy,
    /// Set by the resolver. Stays `None` while the conflict is deferred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_key: Option<Key>,
}

impl ConflictResolution {
    pub fn is_resolved(&self) -> bool {
        self.resolved_key.is_some()
    }
}

/// Outcome of resolving a conflict
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The strategy picked a winner
    Resolved(Key),

    /// No automatic decision was made. `provisional` is the local key and is
    /// NOT authoritative: the conflict must be shown to the user.
    Deferred { provisional: Key },
}

impl Resolution {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Resolution::Deferred { .. })
    }

    /// The winning key, or `None` if the decision was deferred
    pub fn resolved(&self) -> Option<&Key> {
        match self {
            Resolution::Resolved(key) => Some(key),
            Resolution::Deferred { .. } => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KeyType;

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("local".parse::<SyncStrategy>(), Ok(SyncStrategy::LocalWins));
        assert_eq!("Remote".parse::<SyncStrategy>(), Ok(SyncStrategy::RemoteWins));
        assert_eq!(" newer ".parse::<SyncStrategy>(), Ok(SyncStrategy::NewerWins));
        assert_eq!("manual".parse::<SyncStrategy>(), Ok(SyncStrategy::Manual));
        assert_eq!(
            "lww".parse::<SyncStrategy>(),
            Err(StrategyError::Invalid("lww".to_string()))
        );
    }

    #[test]
    fn test_strategy_serialization_matches_as_str() {
        for strategy in [
            SyncStrategy::LocalWins,
            SyncStrategy::RemoteWins,
            SyncStrategy::NewerWins,
            SyncStrategy::Manual,
        ] {
            let json = serde_json::to_string(&strategy).unwrap();
            assert_eq!(json, format!("\"{}\"", strategy.as_str()));
        }
    }

    #[test]
    fn test_delete_change_has_no_payload() {
        let change = KeyChange::delete("old", "device-1");
        assert_eq!(change.change_type, ChangeType::Delete);
        assert!(change.key.is_none());
        assert!(change.checksum.is_empty());

        let json = serde_json::to_string(&change).unwrap();
        assert!(json.contains(r#""type":"delete""#));
        assert!(!json.contains(r#""key":"#));
    }

    #[test]
    fn test_create_change_carries_checksum() {
        let key = Key::new("work", KeyType::Ed25519);
        let change = KeyChange::create(key.clone(), "device-1");
        assert_eq!(change.key_name, "work");
        assert_eq!(change.checksum, compute_checksum(&key));
        assert_eq!(change.key, Some(key));
    }

    #[test]
    fn test_state_from_keys() {
        let keys = vec![
            Key::new("work", KeyType::Ed25519),
            Key::new("home", KeyType::Rsa),
        ];
        let state = SyncState::from_keys("device-1", &keys);

        assert_eq!(state.key_checksums.len(), 2);
        assert_eq!(state.checksum("work"), Some(compute_checksum(&keys[0]).as_str()));
        assert!(state.last_sync_time.is_some());
    }
}
