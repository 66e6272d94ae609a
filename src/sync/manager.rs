//! Sync Manager - Incremental change detection and conflict resolution
//!
//! Reconciles the local key set against a remote copy:
//! - Snapshots each side as a name -> checksum map
//! - Diffs snapshots into Create/Update/Delete changes
//! - Detects keys that diverged on both sides and resolves them by strategy
//! - Folds change lists into a key set (idempotent)

use super::checksum::compute_checksum;
use super::models::{
    ChangeType, ConflictResolution, KeyChange, Resolution, SyncState, SyncStrategy,
};
use crate::models::Key;
use std::collections::{BTreeMap, HashMap};

/// Two-party sync manager (local vs. remote)
#[derive(Debug, Clone)]
pub struct SyncManager {
    device_id: String,
    strategy: SyncStrategy,
    local_state: SyncState,
    remote_state: SyncState,
}

impl SyncManager {
    /// Create a manager with empty local and remote snapshots
    pub fn new(device_id: &str, strategy: SyncStrategy) -> Self {
        Self {
            device_id: device_id.to_string(),
            strategy,
            local_state: SyncState::new(device_id),
            remote_state: SyncState::default(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn strategy(&self) -> SyncStrategy {
        self.strategy
    }

    pub fn local_state(&self) -> &SyncState {
        &self.local_state
    }

    pub fn remote_state(&self) -> &SyncState {
        &self.remote_state
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Rebuild the local snapshot from the full local key set
    pub fn update_local_state(&mut self, keys: &[Key]) {
        self.local_state.rebuild(keys);
        log::debug!(
            "Local snapshot rebuilt: {} keys (device {})",
            self.local_state.key_checksums.len(),
            self.device_id
        );
    }

    /// Replace the local snapshot wholesale (e.g. restored from cache)
    pub fn set_local_state(&mut self, state: SyncState) {
        self.local_state = state;
    }

    /// Install a cached or freshly fetched remote snapshot
    pub fn update_remote_state(&mut self, state: SyncState) {
        self.remote_state = state;
    }

    // ========================================================================
    // Change Detection
    // ========================================================================

    /// Diff the local snapshot against the remote snapshot
    ///
    /// `local_keys` supplies full payloads for Create/Update changes. The
    /// emitted changes are also accumulated on the local snapshot.
    pub fn detect_changes(&mut self, local_keys: &[Key]) -> Vec<KeyChange> {
        let changes = diff_states(
            &self.local_state,
            &self.remote_state,
            local_keys,
            &self.device_id,
        );

        if changes.is_empty() {
            log::debug!("No changes detected - already synchronized");
        } else {
            log::info!("Detected {} change(s) against remote", changes.len());
        }

        self.local_state.changes.extend(changes.iter().cloned());
        changes
    }

    // ========================================================================
    // Conflict Resolution
    // ========================================================================

    /// Find keys present in both sets whose checksums differ
    ///
    /// Keys present on only one side are creates/deletes, not conflicts.
    pub fn detect_conflicts(
        &self,
        local_keys: &[Key],
        remote_keys: &[Key],
    ) -> Vec<ConflictResolution> {
        let remote_map: HashMap<&str, &Key> = remote_keys
            .iter()
            .map(|key| (key.name.as_str(), key))
            .collect();

        let mut conflicts = Vec::new();

        for local_key in local_keys {
            let Some(remote_key) = remote_map.get(local_key.name.as_str()) else {
                continue;
            };

            if compute_checksum(local_key) != compute_checksum(remote_key) {
                log::warn!("Conflict detected for key '{}'", local_key.name);

                conflicts.push(ConflictResolution {
                    key_name: local_key.name.clone(),
                    local_key: local_key.clone(),
                    remote_key: (*remote_key).clone(),
                    strategy: self.strategy,
                    resolved_key: None,
                });
            }
        }

        conflicts
    }

    /// Resolve a conflict according to its strategy
    ///
    /// Writes the winner into `conflict.resolved_key`. For
    /// [`SyncStrategy::Manual`] nothing is decided: the result is
    /// [`Resolution::Deferred`] holding the local key as a provisional
    /// placeholder, `resolved_key` stays `None`, and the caller must surface
    /// the conflict to the user instead of persisting the placeholder.
    pub fn resolve_conflict(&self, conflict: &mut ConflictResolution) -> Resolution {
        let resolution = match conflict.strategy {
            SyncStrategy::LocalWins => Resolution::Resolved(conflict.local_key.clone()),
            SyncStrategy::RemoteWins => Resolution::Resolved(conflict.remote_key.clone()),
            SyncStrategy::NewerWins => {
                if conflict.remote_key.updated_at > conflict.local_key.updated_at {
                    Resolution::Resolved(conflict.remote_key.clone())
                } else {
                    Resolution::Resolved(conflict.local_key.clone())
                }
            }
            SyncStrategy::Manual => Resolution::Deferred {
                provisional: conflict.local_key.clone(),
            },
        };

        conflict.resolved_key = resolution.resolved().cloned();

        log::info!(
            "Conflict for '{}' with {} strategy: {}",
            conflict.key_name,
            conflict.strategy,
            if resolution.is_deferred() { "deferred" } else { "resolved" }
        );

        resolution
    }

    // ========================================================================
    // Change Application
    // ========================================================================

    /// Apply `changes` on top of `keys`
    pub fn apply_changes(&self, keys: &[Key], changes: &[KeyChange]) -> Vec<Key> {
        apply_changes(keys, changes)
    }

    /// Human-readable changelog, one line per change
    pub fn changelog(&self, changes: &[KeyChange]) -> Vec<String> {
        changes
            .iter()
            .map(|change| {
                let verb = match change.change_type {
                    ChangeType::Create => "Created",
                    ChangeType::Update => "Updated",
                    ChangeType::Delete => "Deleted",
                };
                format!("{}: {}", verb, change.key_name)
            })
            .collect()
    }
}

/// Diff `source` against `target`
///
/// Names only in `source` become Create, names in both with differing
/// checksums become Update (carrying the source checksum), names only in
/// `target` become Delete. Creates and Updates come first.
pub(crate) fn diff_states(
    source: &SyncState,
    target: &SyncState,
    source_keys: &[Key],
    device_id: &str,
) -> Vec<KeyChange> {
    let key_map: HashMap<&str, &Key> = source_keys
        .iter()
        .map(|key| (key.name.as_str(), key))
        .collect();

    let mut changes = Vec::new();

    for (name, source_checksum) in &source.key_checksums {
        let change_type = match target.checksum(name) {
            None => ChangeType::Create,
            Some(target_checksum) if target_checksum != source_checksum => ChangeType::Update,
            Some(_) => continue,
        };

        let key = key_map.get(name.as_str()).map(|key| (*key).clone());
        if key.is_none() {
            log::warn!("Snapshot lists '{}' but no key record was supplied", name);
        }

        changes.push(KeyChange {
            change_type,
            key_name: name.clone(),
            key,
            timestamp: chrono::Utc::now(),
            device_id: device_id.to_string(),
            checksum: source_checksum.clone(),
        });
    }

    for name in target.key_checksums.keys() {
        if !source.key_checksums.contains_key(name) {
            changes.push(KeyChange::delete(name, device_id));
        }
    }

    changes
}

/// Fold `changes` into `keys`, returning the resulting set sorted by name
///
/// Deleting an absent key is a no-op, so applying the same list twice gives
/// the same result as applying it once.
pub fn apply_changes(keys: &[Key], changes: &[KeyChange]) -> Vec<Key> {
    let mut key_map: BTreeMap<String, Key> = keys
        .iter()
        .map(|key| (key.name.clone(), key.clone()))
        .collect();

    for change in changes {
        match change.change_type {
            ChangeType::Create | ChangeType::Update => match &change.key {
                Some(key) => {
                    key_map.insert(change.key_name.clone(), key.clone());
                }
                None => {
                    log::warn!(
                        "Skipping {} of '{}': change has no key payload",
                        change.change_type.as_str(),
                        change.key_name
                    );
                }
            },
            ChangeType::Delete => {
                key_map.remove(&change.key_name);
            }
        }
    }

    key_map.into_values().collect()
}

// ============================================================================
// Tests
// ============================================================================
