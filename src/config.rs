//! Configuration Module
//!
//! Sync settings for this device. Defaults come from the platform (hostname,
//! data directory); `from_env` overlays `KEYSYNC_*` variables, loading a
//! `.env` file first if present.

use crate::sync::{HistoryError, HistoryManager, StrategyError, SyncStrategy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of retained history entries
pub const DEFAULT_MAX_HISTORY_ENTRIES: usize = 100;

pub const ENV_DEVICE_ID: &str = "KEYSYNC_DEVICE_ID";
pub const ENV_DEVICE_NAME: &str = "KEYSYNC_DEVICE_NAME";
pub const ENV_STRATEGY: &str = "KEYSYNC_STRATEGY";
pub const ENV_HISTORY_DIR: &str = "KEYSYNC_HISTORY_DIR";
pub const ENV_HISTORY_MAX: &str = "KEYSYNC_HISTORY_MAX";

/// Device-level sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Unique device identifier (UUID v4)
    pub device_id: String,

    /// Device name (defaults to the hostname)
    pub device_name: String,

    /// Conflict resolution strategy
    #[serde(default)]
    pub strategy: SyncStrategy,

    /// Directory holding `sync-history.json`
    pub history_dir: PathBuf,

    /// Maximum retained history entries
    #[serde(default = "default_max_history_entries")]
    pub max_history_entries: usize,
}

fn default_max_history_entries() -> usize {
    DEFAULT_MAX_HISTORY_ENTRIES
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            device_name: get_default_device_name(),
            strategy: SyncStrategy::default(),
            history_dir: default_history_dir(),
            max_history_entries: DEFAULT_MAX_HISTORY_ENTRIES,
        }
    }
}

impl AppConfig {
    /// Defaults overlaid with `KEYSYNC_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with values from `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(device_id) = lookup(ENV_DEVICE_ID) {
            config.device_id = device_id;
        }
        if let Some(device_name) = lookup(ENV_DEVICE_NAME) {
            config.device_name = device_name;
        }
        if let Some(strategy) = lookup(ENV_STRATEGY) {
            config.strategy = strategy.parse()?;
        }
        if let Some(dir) = lookup(ENV_HISTORY_DIR) {
            config.history_dir = PathBuf::from(dir);
        }
        if let Some(max) = lookup(ENV_HISTORY_MAX) {
            config.max_history_entries = max.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_HISTORY_MAX.to_string(),
                value: max.clone(),
            })?;
        }

        config.validate()?;
        log::debug!(
            "Loaded sync config: device {} ({}), strategy {}",
            config.device_id,
            config.device_name,
            config.strategy
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: ENV_DEVICE_ID.to_string(),
                value: self.device_id.clone(),
            });
        }
        if self.max_history_entries == 0 {
            return Err(ConfigError::InvalidValue {
                key: ENV_HISTORY_MAX.to_string(),
                value: "0".to_string(),
            });
        }
        if self.history_dir.as_os_str().is_empty() {
            return Err(ConfigError::NoDataDir);
        }
        Ok(())
    }

    /// Open the JSON history ledger in `history_dir`
    pub fn open_history(&self) -> Result<HistoryManager, HistoryError> {
        HistoryManager::open(&self.history_dir, self.max_history_entries)
    }
}

/// Get default device name from hostname
fn get_default_device_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| format!("{} device", std::env::consts::OS))
}

/// Platform data directory, or empty when it cannot be determined
fn default_history_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "keysync", "keysync")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("Could not determine a data directory; set {}", ENV_HISTORY_DIR)]
    NoDataDir,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.strategy, SyncStrategy::NewerWins);
        assert_eq!(config.max_history_entries, 100);
        assert!(!config.device_id.is_empty());
    }

    #[test]
    fn test_lookup_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            (ENV_DEVICE_ID, "device-abc"),
            (ENV_STRATEGY, "remote"),
            (ENV_HISTORY_DIR, "/tmp/keysync"),
            (ENV_HISTORY_MAX, "25"),
        ]))
        .unwrap();

        assert_eq!(config.device_id, "device-abc");
        assert_eq!(config.strategy, SyncStrategy::RemoteWins);
        assert_eq!(config.history_dir, PathBuf::from("/tmp/keysync"));
        assert_eq!(config.max_history_entries, 25);
    }

    #[test]
    fn test_invalid_strategy_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[
            (ENV_STRATEGY, "whoever"),
            (ENV_HISTORY_DIR, "/tmp/keysync"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Strategy(StrategyError::Invalid(_))));
    }

    #[test]
    fn test_invalid_history_max_rejected() {
        for value in ["many", "0"] {
            let err = AppConfig::from_lookup(lookup_from(&[
                (ENV_HISTORY_MAX, value),
                (ENV_HISTORY_DIR, "/tmp/keysync"),
            ]))
            .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { .. }));
        }
    }

    #[test]
    fn test_serde_defaults() {
        let json = r#"{
            "device_id": "d1",
            "device_name": "laptop",
            "history_dir": "/var/lib/keysync"
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.strategy, SyncStrategy::NewerWins);
        assert_eq!(config.max_history_entries, DEFAULT_MAX_HISTORY_ENTRIES);
    }

    #[test]
    fn test_open_history_uses_configured_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = AppConfig::from_lookup(lookup_from(&[
            (ENV_HISTORY_DIR, dir.path().to_str().unwrap()),
            (ENV_HISTORY_MAX, "5"),
        ]))
        .unwrap();

        let history = config.open_history().unwrap();
        assert!(history.is_empty());
        assert_eq!(history.max_entries(), 5);
        assert!(history.location().ends_with("sync-history.json"));
    }
}
