//! Sync History Module - Bounded Ledger of Sync Attempts
//!
//! Keeps one entry per reconciliation attempt:
//! - Appends entries and persists the whole ledger through a `HistoryStore`
//! - Enforces a maximum retained-entry count (oldest dropped first)
//! - Answers chronological and filtered queries
//! - Derives aggregate statistics and human-readable reports

use super::models::KeyChange;
use super::store::{HistoryStore, JsonFileStore};
use crate::db::DbError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Types & Structures
// ============================================================================

/// Direction of a sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Push,
    Pull,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Push => "push",
            SyncDirection::Pull => "pull",
        }
    }
}

impl FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(SyncDirection::Push),
            "pull" => Ok(SyncDirection::Pull),
            _ => Err(format!("Invalid direction: {}", s)),
        }
    }
}

/// A single sync attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    /// Assigned by [`HistoryManager::add`] when empty
    #[serde(default)]
    pub id: String,
    /// Assigned by [`HistoryManager::add`] when left at the Unix epoch
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub device_id: String,
    /// `None` for entries written without a direction
    #[serde(default)]
    pub direction: Option<SyncDirection>,
    #[serde(default)]
    pub changes_applied: usize,
    #[serde(default)]
    pub conflicts_found: usize,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub changes: Vec<KeyChange>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl SyncHistoryEntry {
    /// Start a successful entry with no id and no timestamp yet
    pub fn new(device_id: &str, direction: SyncDirection) -> Self {
        Self {
            id: String::new(),
            timestamp: DateTime::<Utc>::default(),
            device_id: device_id.to_string(),
            direction: Some(direction),
            changes_applied: 0,
            conflicts_found: 0,
            success: true,
            error: None,
            changes: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_changes(mut self, changes: Vec<KeyChange>) -> Self {
        self.changes_applied = changes.len();
        self.changes = changes;
        self
    }

    pub fn with_conflicts(mut self, conflicts_found: usize) -> Self {
        self.conflicts_found = conflicts_found;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    fn has_timestamp(&self) -> bool {
        self.timestamp != DateTime::<Utc>::default()
    }
}

/// Aggregate statistics over the retained ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    pub total_syncs: usize,
    pub successful_syncs: usize,
    pub failed_syncs: usize,
    pub total_changes: usize,
    pub total_conflicts: usize,
    pub push_count: usize,
    pub pull_count: usize,
    /// `None` when the ledger is empty
    pub last_sync_time: Option<DateTime<Utc>>,
}

// ============================================================================
// History Manager
// ============================================================================

/// File name used by [`HistoryManager::open`]
pub const HISTORY_FILE_NAME: &str = "sync-history.json";

/// Manages the sync history ledger
pub struct HistoryManager {
    store: Box<dyn HistoryStore>,
    entries: Vec<SyncHistoryEntry>,
    max_entries: usize,
}

impl HistoryManager {
    /// Create a manager over `store`, loading whatever it already holds
    pub fn new(store: Box<dyn HistoryStore>, max_entries: usize) -> Result<Self, HistoryError> {
        let entries = store.load()?;
        log::debug!(
            "Loaded {} sync history entries from {}",
            entries.len(),
            store.location()
        );

        Ok(Self {
            store,
            entries,
            max_entries,
        })
    }

    /// Open the JSON ledger stored in `config_dir`
    pub fn open(config_dir: &Path, max_entries: usize) -> Result<Self, HistoryError> {
        let store = JsonFileStore::new(config_dir.join(HISTORY_FILE_NAME));
        Self::new(Box::new(store), max_entries)
    }

    pub fn location(&self) -> String {
        self.store.location()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry and persist the ledger
    ///
    /// Returns the entry id. If persisting fails the entry stays in memory,
    /// so [`save`](Self::save) can be retried without re-adding it.
    pub fn add(&mut self, mut entry: SyncHistoryEntry) -> Result<String, HistoryError> {
        if !entry.has_timestamp() {
            entry.timestamp = Utc::now();
        }
        if entry.id.is_empty() {
            entry.id = uuid::Uuid::new_v4().to_string();
        } else if self.entries.iter().any(|e| e.id == entry.id) {
            return Err(HistoryError::DuplicateId(entry.id));
        }

        let id = entry.id.clone();
        log::info!(
            "Recording {} sync {} ({} changes, {} conflicts)",
            direction_label(entry.direction),
            if entry.success { "success" } else { "failure" },
            entry.changes_applied,
            entry.conflicts_found
        );

        self.entries.push(entry);
        self.merge_persisted();
        self.save()?;

        Ok(id)
    }

    /// Pick up entries written by other processes since we loaded
    fn merge_persisted(&mut self) {
        match self.store.load() {
            Ok(persisted) => {
                for entry in persisted {
                    if !self.entries.iter().any(|e| e.id == entry.id) {
                        self.entries.push(entry);
                    }
                }
            }
            Err(e) => {
                log::warn!("Could not reload sync history before saving: {}", e);
            }
        }
    }

    /// Sort newest first, truncate to `max_entries` and persist
    pub fn save(&mut self) -> Result<(), HistoryError> {
        sort_newest_first(&mut self.entries);
        self.entries.truncate(self.max_entries);
        self.store.save(&self.entries)
    }

    /// The `n` most recent entries, newest first
    pub fn get_recent(&self, n: usize) -> Vec<SyncHistoryEntry> {
        let mut entries = self.entries.clone();
        sort_newest_first(&mut entries);
        entries.truncate(n);
        entries
    }

    pub fn get_by_id(&self, id: &str) -> Option<&SyncHistoryEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Entries strictly between `start` and `end`, newest first
    pub fn get_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<SyncHistoryEntry> {
        self.filter(|entry| entry.timestamp > start && entry.timestamp < end)
    }

    pub fn get_by_device(&self, device_id: &str) -> Vec<SyncHistoryEntry> {
        self.filter(|entry| entry.device_id == device_id)
    }

    pub fn get_by_direction(&self, direction: SyncDirection) -> Vec<SyncHistoryEntry> {
        self.filter(|entry| entry.direction == Some(direction))
    }

    pub fn get_failed(&self) -> Vec<SyncHistoryEntry> {
        self.filter(|entry| !entry.success)
    }

    fn filter<F>(&self, predicate: F) -> Vec<SyncHistoryEntry>
    where
        F: Fn(&SyncHistoryEntry) -> bool,
    {
        let mut result: Vec<SyncHistoryEntry> = self
            .entries
            .iter()
            .filter(|entry| predicate(entry))
            .cloned()
            .collect();
        sort_newest_first(&mut result);
        result
    }

    /// Derive statistics in a single pass
    pub fn get_stats(&self) -> SyncStats {
        let mut stats = SyncStats {
            total_syncs: self.entries.len(),
            ..Default::default()
        };

        for entry in &self.entries {
            if entry.success {
                stats.successful_syncs += 1;
            } else {
                stats.failed_syncs += 1;
            }

            stats.total_changes += entry.changes_applied;
            stats.total_conflicts += entry.conflicts_found;

            match entry.direction {
                Some(SyncDirection::Push) => stats.push_count += 1,
                Some(SyncDirection::Pull) => stats.pull_count += 1,
                None => {}
            }

            if stats.last_sync_time.map_or(true, |last| entry.timestamp > last) {
                stats.last_sync_time = Some(entry.timestamp);
            }
        }

        stats
    }

    /// Remove every entry and persist the empty ledger
    pub fn clear(&mut self) -> Result<(), HistoryError> {
        self.entries.clear();
        self.store.save(&self.entries)?;
        log::info!("Sync history cleared ({})", self.store.location());
        Ok(())
    }

    /// Render entries as a multi-line report
    pub fn format_history(entries: &[SyncHistoryEntry]) -> String {
        if entries.is_empty() {
            return "No sync history found.".to_string();
        }

        let mut out = String::from("Sync History:\n");
        out.push_str(&"═".repeat(61));
        out.push_str("\n\n");

        for (i, entry) in entries.iter().enumerate() {
            let status = if entry.success { "✓" } else { "✗" };
            let _ = writeln!(
                out,
                "{} [{}] {} - {}",
                status,
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                direction_label(entry.direction),
                entry.device_id
            );
            let _ = writeln!(
                out,
                "   Changes: {}, Conflicts: {}, Duration: {:?}",
                entry.changes_applied,
                entry.conflicts_found,
                entry.duration()
            );

            if let Some(error) = &entry.error {
                let _ = writeln!(out, "   Error: {}", error);
            }

            if !entry.changes.is_empty() {
                out.push_str("   Changes:\n");
                for change in &entry.changes {
                    let _ = writeln!(out, "     {} {}", change.change_type.symbol(), change.key_name);
                }
            }

            if i + 1 < entries.len() {
                out.push('\n');
            }
        }

        out
    }
}

fn direction_label(direction: Option<SyncDirection>) -> &'static str {
    direction.map_or("unknown", |d| d.as_str())
}

fn sort_newest_first(entries: &mut [SyncHistoryEntry]) {
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Failed to read history from {location}: {source}")]
    Read {
        location: String,
        source: std::io::Error,
    },

    #[error("Failed to write history to {location}: {source}")]
    Write {
        location: String,
        source: std::io::Error,
    },

    #[error("Failed to parse history at {location}: {source}")]
    Parse {
        location: String,
        source: serde_json::Error,
    },

    #[error("Failed to serialize history for {location}: {source}")]
    Serialize {
        location: String,
        source: serde_json::Error,
    },

    #[error("History entry {0} already exists")]
    DuplicateId(String),

    #[error("Database error at {location}: {source}")]
    Database {
        location: String,
        source: DbError,
    },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Key, KeyType};
    use crate::sync::store::{MemoryStore, SqliteHistoryStore};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    struct BrokenStore;

    impl HistoryStore for BrokenStore {
        fn load(&self) -> Result<Vec<SyncHistoryEntry>, HistoryError> {
            Ok(Vec::new())
        }

        fn save(&self, _entries: &[SyncHistoryEntry]) -> Result<(), HistoryError> {
            Err(HistoryError::Write {
                location: "broken".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }

        fn location(&self) -> String {
            "broken".to_string()
        }
    }

    /// Fails the first save, then writes through to `inner`
    struct FlakyStore {
        inner: MemoryStore,
        failed_once: AtomicBool,
    }

    impl HistoryStore for FlakyStore {
        fn load(&self) -> Result<Vec<SyncHistoryEntry>, HistoryError> {
            self.inner.load()
        }

        fn save(&self, entries: &[SyncHistoryEntry]) -> Result<(), HistoryError> {
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                return Err(HistoryError::Write {
                    location: "flaky".to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::Interrupted, "disk busy"),
                });
            }
            self.inner.save(entries)
        }

        fn location(&self) -> String {
            "flaky".to_string()
        }
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap()
    }

    fn entry(minute: u32, success: bool, changes_applied: usize) -> SyncHistoryEntry {
        let mut entry = SyncHistoryEntry::new("device-1", SyncDirection::Push).with_timestamp(at(minute));
        entry.success = success;
        entry.changes_applied = changes_applied;
        entry
    }

    fn memory_manager(max_entries: usize) -> HistoryManager {
        HistoryManager::new(Box::new(MemoryStore::new()), max_entries).unwrap()
    }

    #[test]
    fn test_add_assigns_id_and_timestamp() {
        let mut manager = memory_manager(10);
        let id = manager
            .add(SyncHistoryEntry::new("device-1", SyncDirection::Pull))
            .unwrap();

        let stored = manager.get_by_id(&id).unwrap();
        assert!(!stored.id.is_empty());
        assert!(stored.has_timestamp());
    }

    #[test]
    fn test_add_assigns_distinct_ids() {
        let mut manager = memory_manager(10);
        let a = manager.add(SyncHistoryEntry::new("d", SyncDirection::Push)).unwrap();
        let b = manager.add(SyncHistoryEntry::new("d", SyncDirection::Push)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_truncation_keeps_most_recent() {
        let mut manager = memory_manager(2);
        manager.add(entry(1, true, 0)).unwrap();
        manager.add(entry(2, true, 0)).unwrap();
        manager.add(entry(3, true, 0)).unwrap();

        let recent = manager.get_recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].timestamp, at(3));
        assert_eq!(recent[1].timestamp, at(2));
    }

    #[test]
    fn test_get_recent_bounds() {
        let mut manager = memory_manager(10);
        manager.add(entry(1, true, 0)).unwrap();
        manager.add(entry(2, true, 0)).unwrap();

        assert!(manager.get_recent(0).is_empty());
        assert_eq!(manager.get_recent(1)[0].timestamp, at(2));
        assert_eq!(manager.get_recent(50).len(), 2);
    }

    #[test]
    fn test_stats_aggregation() {
        let mut manager = memory_manager(10);
        manager.add(entry(1, true, 2)).unwrap();
        manager.add(entry(2, false, 0)).unwrap();
        manager.add(entry(3, true, 5).with_conflicts(1)).unwrap();

        let stats = manager.get_stats();
        assert_eq!(stats.total_syncs, 3);
        assert_eq!(stats.successful_syncs, 2);
        assert_eq!(stats.failed_syncs, 1);
        assert_eq!(stats.total_changes, 7);
        assert_eq!(stats.total_conflicts, 1);
        assert_eq!(stats.push_count, 3);
        assert_eq!(stats.pull_count, 0);
        assert_eq!(stats.last_sync_time, Some(at(3)));
    }

    #[test]
    fn test_stats_empty_ledger() {
        let manager = memory_manager(10);
        assert_eq!(manager.get_stats(), SyncStats::default());
    }

    #[test]
    fn test_filters() {
        let mut manager = memory_manager(10);
        manager.add(entry(1, true, 0)).unwrap();
        manager.add(entry(2, false, 0)).unwrap();
        let mut pull = SyncHistoryEntry::new("device-2", SyncDirection::Pull).with_timestamp(at(3));
        pull.changes_applied = 4;
        manager.add(pull).unwrap();

        assert_eq!(manager.get_by_device("device-2").len(), 1);
        assert_eq!(manager.get_by_direction(SyncDirection::Push).len(), 2);
        assert_eq!(manager.get_failed().len(), 1);

        let range = manager.get_by_date_range(at(1), at(3));
        assert_eq!(range.len(), 1);
        assert_eq!(range[0].timestamp, at(2));
    }

    #[test]
    fn test_failed_save_keeps_entry_in_memory() {
        let mut manager = HistoryManager::new(Box::new(BrokenStore), 10).unwrap();

        let result = manager.add(entry(1, true, 1));
        assert!(matches!(result, Err(HistoryError::Write { .. })));
        assert_eq!(manager.len(), 1);
        assert!(manager.save().is_err());
    }

    #[test]
    fn test_save_retry_persists_entry_once() {
        let inner = MemoryStore::new();
        let store = FlakyStore {
            inner: inner.clone(),
            failed_once: AtomicBool::new(false),
        };
        let mut manager = HistoryManager::new(Box::new(store), 10).unwrap();

        let result = manager.add(entry(1, true, 1).with_id("pending"));
        assert!(matches!(result, Err(HistoryError::Write { .. })));
        assert!(inner.snapshot().is_empty());

        manager.save().unwrap();
        let persisted = inner.snapshot();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].id, "pending");
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let store = SqliteHistoryStore::new(Database::in_memory().unwrap());
        let mut manager = HistoryManager::new(Box::new(store.clone()), 10).unwrap();

        manager.add(entry(1, true, 0).with_id("fixed")).unwrap();
        let err = manager.add(entry(2, true, 0).with_id("fixed")).unwrap_err();
        assert!(matches!(err, HistoryError::DuplicateId(ref id) if id == "fixed"));
        assert_eq!(manager.len(), 1);

        let fresh = manager.add(entry(3, true, 0)).unwrap();
        let persisted = store.load().unwrap();
        assert_eq!(persisted.len(), 2);
        assert!(persisted.iter().any(|e| e.id == fresh));
        assert_eq!(manager.get_by_id("fixed").unwrap().timestamp, at(1));
    }

    #[test]
    fn test_entry_without_direction_counts_in_totals_only() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(HISTORY_FILE_NAME),
            r#"[
                {"id":"legacy","timestamp":"2024-01-01T00:00:00Z","success":true},
                {"id":"p","timestamp":"2024-01-02T00:00:00Z","direction":"pull","success":true}
            ]"#,
        )
        .unwrap();

        let manager = HistoryManager::open(temp_dir.path(), 100).unwrap();
        let stats = manager.get_stats();
        assert_eq!(stats.total_syncs, 2);
        assert_eq!(stats.pull_count, 1);
        assert_eq!(stats.push_count, 0);
        assert_eq!(manager.get_by_direction(SyncDirection::Pull).len(), 1);

        let legacy = manager.get_by_id("legacy").unwrap();
        let report = HistoryManager::format_history(std::slice::from_ref(legacy));
        assert!(report.contains("unknown - "));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = MemoryStore::new();
        let mut manager = HistoryManager::new(Box::new(store.clone()), 10).unwrap();
        manager.add(entry(1, true, 0)).unwrap();

        manager.clear().unwrap();
        manager.clear().unwrap();
        assert!(manager.is_empty());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_add_merges_entries_from_other_writers() {
        let store = MemoryStore::new();
        let mut first = HistoryManager::new(Box::new(store.clone()), 10).unwrap();
        let mut second = HistoryManager::new(Box::new(store.clone()), 10).unwrap();

        first.add(entry(1, true, 0)).unwrap();
        second.add(entry(2, true, 0)).unwrap();

        assert_eq!(store.snapshot().len(), 2);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let manager = HistoryManager::open(temp_dir.path(), 100).unwrap();
        assert!(manager.is_empty());
    }

    #[test]
    fn test_open_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let id = {
            let mut manager = HistoryManager::open(temp_dir.path(), 100).unwrap();
            manager.add(entry(1, true, 3)).unwrap()
        };

        let manager = HistoryManager::open(temp_dir.path(), 100).unwrap();
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.get_by_id(&id).unwrap().changes_applied, 3);
    }

    #[test]
    fn test_format_history() {
        let mut key = Key::new("work", KeyType::Ed25519);
        key.comment = "laptop".to_string();

        let ok = SyncHistoryEntry::new("device-1", SyncDirection::Push)
            .with_timestamp(at(5))
            .with_changes(vec![
                KeyChange::create(key, "device-1"),
                KeyChange::delete("old", "device-1"),
            ])
            .with_duration(Duration::from_millis(1500));
        let failed = SyncHistoryEntry::new("device-1", SyncDirection::Pull)
            .with_timestamp(at(4))
            .failed("remote unavailable");

        let report = HistoryManager::format_history(&[ok, failed]);
        assert!(report.starts_with("Sync History:\n"));
        assert!(report.contains("✓ [2024-05-01 10:05:00] push - device-1"));
        assert!(report.contains("   Changes: 2, Conflicts: 0, Duration: 1.5s"));
        assert!(report.contains("     + work"));
        assert!(report.contains("     - old"));
        assert!(report.contains("✗ [2024-05-01 10:04:00] pull - device-1"));
        assert!(report.contains("   Error: remote unavailable"));
    }

    #[test]
    fn test_format_history_empty() {
        assert_eq!(HistoryManager::format_history(&[]), "No sync history found.");
    }
}
