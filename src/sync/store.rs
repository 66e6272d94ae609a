//! History Stores - Persistence sinks for the sync ledger
//!
//! A store reads and writes the whole ordered list of history entries at a
//! single location. Three implementations:
//! - `JsonFileStore`: pretty JSON file, replaced atomically on every save
//! - `SqliteHistoryStore`: `sync_history` table, replaced in one transaction
//! - `MemoryStore`: shared in-memory list

use super::history::{HistoryError, SyncDirection, SyncHistoryEntry};
use super::models::KeyChange;
use crate::db::{Database, DbError};
use chrono::{DateTime, Utc};
use rusqlite::params;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Read-all / write-all persistence for history entries
pub trait HistoryStore: Send {
    /// Load every persisted entry. A store that was never written is empty.
    fn load(&self) -> Result<Vec<SyncHistoryEntry>, HistoryError>;

    /// Replace the persisted entries with `entries`
    fn save(&self, entries: &[SyncHistoryEntry]) -> Result<(), HistoryError>;

    /// Human-readable location for error messages and logs
    fn location(&self) -> String;
}

// ============================================================================
// JSON File Store
// ============================================================================

/// History stored as a JSON array in a single file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_error(&self, source: io::Error) -> HistoryError {
        HistoryError::Write {
            location: self.location(),
            source,
        }
    }
}

impl HistoryStore for JsonFileStore {
    fn load(&self) -> Result<Vec<SyncHistoryEntry>, HistoryError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(HistoryError::Read {
                    location: self.location(),
                    source,
                })
            }
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        serde_json::from_slice(&data).map_err(|source| HistoryError::Parse {
            location: self.location(),
            source,
        })
    }

    fn save(&self, entries: &[SyncHistoryEntry]) -> Result<(), HistoryError> {
        let data = serde_json::to_vec_pretty(entries).map_err(|source| HistoryError::Serialize {
            location: self.location(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_private_dir(parent).map_err(|e| self.write_error(e))?;
        }

        atomic_write(&self.path, &data).map_err(|e| self.write_error(e))?;
        log::debug!("Saved {} history entries to {}", entries.len(), self.location());
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

fn create_private_dir(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

/// Write to a sibling temp file, fsync, then rename over `path`
fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp = PathBuf::from(tmp_name);

    let result = (|| {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp)?;
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, path)?;
        sync_parent_dir(path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn sync_parent_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::File::open(parent)?.sync_all()?;
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

// ============================================================================
// SQLite Store
// ============================================================================

/// History stored in the `sync_history` table
#[derive(Clone)]
pub struct SqliteHistoryStore {
    db: Database,
}

/// Raw column values, converted outside the row mapper
struct HistoryRow {
    id: String,
    timestamp: String,
    device_id: String,
    direction: Option<String>,
    changes_applied: i64,
    conflicts_found: i64,
    success: bool,
    error: Option<String>,
    changes: String,
    duration_ms: i64,
}

impl SqliteHistoryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn db_error(&self, source: DbError) -> HistoryError {
        HistoryError::Database {
            location: self.location(),
            source,
        }
    }

    fn row_to_entry(&self, row: HistoryRow) -> Result<SyncHistoryEntry, HistoryError> {
        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                self.db_error(DbError::Serialization(format!(
                    "invalid timestamp '{}' for entry {}: {}",
                    row.timestamp, row.id, e
                )))
            })?;
        let direction = row
            .direction
            .map(|d| d.parse::<SyncDirection>())
            .transpose()
            .map_err(|e: String| self.db_error(DbError::Serialization(e)))?;
        let changes: Vec<KeyChange> =
            serde_json::from_str(&row.changes).map_err(|source| HistoryError::Parse {
                location: self.location(),
                source,
            })?;

        Ok(SyncHistoryEntry {
            id: row.id,
            timestamp,
            device_id: row.device_id,
            direction,
            changes_applied: usize::try_from(row.changes_applied).unwrap_or(0),
            conflicts_found: usize::try_from(row.conflicts_found).unwrap_or(0),
            success: row.success,
            error: row.error,
            changes,
            duration_ms: u64::try_from(row.duration_ms).unwrap_or(0),
        })
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn load(&self) -> Result<Vec<SyncHistoryEntry>, HistoryError> {
        let rows = self
            .db
            .query(
                "SELECT id, timestamp, device_id, direction, changes_applied,
                        conflicts_found, success, error, changes, duration_ms
                 FROM sync_history
                 ORDER BY timestamp DESC",
                [],
                |row| {
                    Ok(HistoryRow {
                        id: row.get(0)?,
                        timestamp: row.get(1)?,
                        device_id: row.get(2)?,
                        direction: row.get(3)?,
                        changes_applied: row.get(4)?,
                        conflicts_found: row.get(5)?,
                        success: row.get(6)?,
                        error: row.get(7)?,
                        changes: row.get(8)?,
                        duration_ms: row.get(9)?,
                    })
                },
            )
            .map_err(|e| self.db_error(e))?;

        rows.into_iter().map(|row| self.row_to_entry(row)).collect()
    }

    fn save(&self, entries: &[SyncHistoryEntry]) -> Result<(), HistoryError> {
        let mut encoded = Vec::with_capacity(entries.len());
        for entry in entries {
            let changes = serde_json::to_string(&entry.changes).map_err(|source| {
                HistoryError::Serialize {
                    location: self.location(),
                    source,
                }
            })?;
            encoded.push((entry, changes));
        }

        self.db
            .with_transaction(|tx| {
                tx.execute("DELETE FROM sync_history", [])?;

                let mut stmt = tx.prepare(
                    "INSERT INTO sync_history (
                        id, timestamp, device_id, direction, changes_applied,
                        conflicts_found, success, error, changes, duration_ms
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )?;

                for (entry, changes) in &encoded {
                    stmt.execute(params![
                        entry.id,
                        entry.timestamp.to_rfc3339(),
                        entry.device_id,
                        entry.direction.map(|d| d.as_str()),
                        i64::try_from(entry.changes_applied).unwrap_or(i64::MAX),
                        i64::try_from(entry.conflicts_found).unwrap_or(i64::MAX),
                        entry.success,
                        entry.error,
                        changes,
                        i64::try_from(entry.duration_ms).unwrap_or(i64::MAX),
                    ])?;
                }

                Ok(())
            })
            .map_err(|e| self.db_error(e))
    }

    fn location(&self) -> String {
        format!("sqlite:{}", self.db.location())
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// In-memory store; clones share the same entries
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<Vec<SyncHistoryEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the currently persisted entries
    pub fn snapshot(&self) -> Vec<SyncHistoryEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl HistoryStore for MemoryStore {
    fn load(&self) -> Result<Vec<SyncHistoryEntry>, HistoryError> {
        Ok(self.snapshot())
    }

    fn save(&self, entries: &[SyncHistoryEntry]) -> Result<(), HistoryError> {
        *self.entries.lock().unwrap_or_else(|e| e.into_inner()) = entries.to_vec();
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
