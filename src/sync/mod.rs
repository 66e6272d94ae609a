//! Sync Module - Incremental Key Metadata Synchronization
//!
//! Reconciles the local key set against a remote copy:
//! - Checksums: semantic fingerprint of each key
//! - Change detection: Create/Update/Delete from snapshot diffs
//! - Conflict resolution: local, remote, newer-wins or manual strategies
//! - History: bounded, persisted ledger of every sync attempt
//!
//! Two-party model only (this device vs. remote). Transport, encryption and
//! the keystore itself live outside this module.

pub mod checksum;
pub mod models;
pub mod manager;
pub mod history;
pub mod store;
pub mod session;


// Re-export commonly used types
pub use checksum::compute_checksum;

pub use models::{
    SyncStrategy, StrategyError,
    ChangeType, KeyChange,
    SyncState,
    ConflictResolution, Resolution,
};

pub use manager::{SyncManager, apply_changes};
pub use history::{HistoryManager, SyncHistoryEntry, SyncDirection, SyncStats, HistoryError};
pub use store::{HistoryStore, JsonFileStore, SqliteHistoryStore, MemoryStore};
pub use session::{SyncSession, SyncReport, SyncError};
