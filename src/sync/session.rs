//! Sync Session - One complete reconciliation pass
//!
//! snapshot -> detect changes -> resolve conflicts -> apply -> record history
//!
//! The remote key set must already be fetched; no network I/O happens here.

use super::checksum::compute_checksum;
use super::history::{HistoryError, HistoryManager, SyncDirection, SyncHistoryEntry};
use super::manager::{diff_states, SyncManager};
use super::models::{ConflictResolution, KeyChange, Resolution, SyncState, SyncStrategy};
use crate::models::Key;
use std::time::{Duration, Instant};

/// Party id used for snapshots built from the remote key set
pub const REMOTE_PARTY: &str = "remote";

/// Result of a reconciliation pass
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Id of the history entry recorded for this pass
    pub entry_id: String,
    pub direction: SyncDirection,
    /// New key set for the target side (remote for push, local for pull)
    pub keys: Vec<Key>,
    /// Changes applied to the target side
    pub changes: Vec<KeyChange>,
    /// Conflicts settled by the configured strategy
    pub resolved: Vec<ConflictResolution>,
    /// Conflicts deferred to the user; the target keeps its own version
    pub pending: Vec<ConflictResolution>,
    pub duration: Duration,
}

impl SyncReport {
    pub fn has_pending_conflicts(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Runs reconciliation passes for one device and records them
pub struct SyncSession<'h> {
    device_id: String,
    strategy: SyncStrategy,
    history: &'h mut HistoryManager,
}

impl<'h> SyncSession<'h> {
    pub fn new(device_id: &str, strategy: SyncStrategy, history: &'h mut HistoryManager) -> Self {
        Self {
            device_id: device_id.to_string(),
            strategy,
            history,
        }
    }

    /// Reconcile `local` and `remote` in `direction`
    ///
    /// Push brings the remote set in line with the local one, pull does the
    /// reverse. The returned report holds the new target key set.
    pub fn run(
        &mut self,
        direction: SyncDirection,
        local: &[Key],
        remote: &[Key],
    ) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        log::info!(
            "Starting {} sync for device {} ({} local, {} remote keys, {} strategy)",
            direction.as_str(),
            self.device_id,
            local.len(),
            remote.len(),
            self.strategy
        );

        let mut manager = SyncManager::new(&self.device_id, self.strategy);
        manager.update_local_state(local);
        manager.update_remote_state(SyncState::from_keys(REMOTE_PARTY, remote));

        // Changes are tagged with the party they originate from
        let (mut changes, target, origin) = match direction {
            SyncDirection::Push => (manager.detect_changes(local), remote, self.device_id.as_str()),
            SyncDirection::Pull => (
                diff_states(manager.remote_state(), manager.local_state(), remote, REMOTE_PARTY),
                local,
                REMOTE_PARTY,
            ),
        };

        let mut resolved = Vec::new();
        let mut pending = Vec::new();

        for mut conflict in manager.detect_conflicts(local, remote) {
            match manager.resolve_conflict(&mut conflict) {
                Resolution::Resolved(winner) => {
                    settle_change(&mut changes, &conflict.key_name, winner, target, origin);
                    resolved.push(conflict);
                }
                Resolution::Deferred { .. } => {
                    changes.retain(|change| change.key_name != conflict.key_name);
                    pending.push(conflict);
                }
            }
        }

        let keys = manager.apply_changes(target, &changes);
        let duration = started.elapsed();

        let entry_id = uuid::Uuid::new_v4().to_string();
        let entry = SyncHistoryEntry::new(&self.device_id, direction)
            .with_id(entry_id.clone())
            .with_changes(changes.clone())
            .with_conflicts(resolved.len() + pending.len())
            .with_duration(duration);

        let report = SyncReport {
            entry_id,
            direction,
            keys,
            changes,
            resolved,
            pending,
            duration,
        };

        if report.has_pending_conflicts() {
            log::warn!(
                "{} conflict(s) need manual resolution",
                report.pending.len()
            );
        }

        match self.history.add(entry) {
            Ok(_) => {
                log::info!(
                    "{} sync finished: {} change(s) in {:?}",
                    direction.as_str(),
                    report.changes.len(),
                    report.duration
                );
                Ok(report)
            }
            Err(source) => {
                log::error!("Sync finished but history could not be saved: {}", source);
                Err(SyncError::HistoryNotSaved {
                    report: Box::new(report),
                    source,
                })
            }
        }
    }

    /// Record a pass that failed before reconciliation (e.g. fetch error)
    pub fn record_failure(
        &mut self,
        direction: SyncDirection,
        error: &str,
        duration: Duration,
    ) -> Result<String, SyncError> {
        log::error!("{} sync failed: {}", direction.as_str(), error);

        let entry = SyncHistoryEntry::new(&self.device_id, direction)
            .failed(error)
            .with_duration(duration);
        Ok(self.history.add(entry)?)
    }
}

/// Point the change for a resolved conflict at the winner, or drop it when
/// the target already holds the winner
fn settle_change(
    changes: &mut Vec<KeyChange>,
    key_name: &str,
    winner: Key,
    target: &[Key],
    device_id: &str,
) {
    let winner_checksum = compute_checksum(&winner);
    let target_has_winner = target
        .iter()
        .find(|key| key.name == key_name)
        .is_some_and(|key| compute_checksum(key) == winner_checksum);

    changes.retain(|change| change.key_name != key_name);
    if !target_has_winner {
        changes.push(KeyChange::update(winner, device_id));
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Reconciliation succeeded; only the ledger write failed. The report is
    /// kept so the caller can still persist the new key set, and its
    /// `entry_id` names the entry left pending in memory.
    #[error("Sync completed but history was not saved: {source}")]
    HistoryNotSaved {
        report: Box<SyncReport>,
        source: HistoryError,
    },

    #[error("History error: {0}")]
    History(#[from] HistoryError),
}

// ============================================================================
// Tests
// ============================================================================
