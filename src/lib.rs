//! # Keysync
//!
//! State synchronization core for an SSH key manager: detects changes
//! between the local key set and a remote copy, resolves conflicts, applies
//! the result and keeps a history of every sync.

pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod sync;

pub use config::{AppConfig, ConfigError};
pub use models::{Key, KeyType};
pub use sync::{
    HistoryManager, SyncDirection, SyncError, SyncManager, SyncReport, SyncSession,
    SyncStrategy,
};

// ============================================================================
// Entry Point
// ============================================================================

/// Load `.env`, start logging and read the device configuration
pub fn init() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    logging::init();

    let config = AppConfig::from_env()?;
    log::info!(
        "Keysync ready on {} ({}), history in {}",
        config.device_name,
        config.device_id,
        config.history_dir.display()
    );
    Ok(config)
}
