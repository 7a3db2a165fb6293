//! Settings persistence
//!
//! The host owns storage: a key-value blob holding one `settings` record
//! (toggles and stats together). This module defines that record and the
//! thin contract used to read and write it. An absent record means "fresh
//! install", never an error.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Settings, Stats, StatsDelta};

/// Storage key of the combined record.
pub const SETTINGS_KEY: &str = "settings";

/// Error type for storage access.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Invalid settings record: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The persisted `settings` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct StoredSettings {
    #[serde(flatten)]
    pub settings: Settings,
    #[serde(default)]
    pub stats: Stats,
}

impl Default for StoredSettings {
    /// Fresh-install record: everything blocked, zeroed stats.
    fn default() -> Self {
        Self {
            settings: Settings::install_defaults(),
            stats: Stats::default(),
        }
    }
}

impl StoredSettings {
    pub fn apply_delta(&mut self, delta: &StatsDelta) {
        self.stats.apply(delta);
    }
}

/// Host key-value storage.
pub trait SettingsStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    fn set(&mut self, key: &str, value: Value) -> Result<(), StorageError>;
}

/// Read the record. `Ok(None)` when absent.
pub fn read_settings<S: SettingsStore + ?Sized>(store: &S) -> Result<Option<StoredSettings>, StorageError> {
    match store.get(SETTINGS_KEY)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Read the record, falling back to install defaults when it is absent or
/// unreadable.
pub fn load_or_default<S: SettingsStore + ?Sized>(store: &S) -> StoredSettings {
    match read_settings(store) {
        Ok(Some(record)) => record,
        Ok(None) => StoredSettings::default(),
        Err(e) => {
            warn!("unreadable settings record, using defaults: {}", e);
            StoredSettings::default()
        }
    }
}

pub fn save_settings<S: SettingsStore + ?Sized>(store: &mut S, record: &StoredSettings) -> Result<(), StorageError> {
    store.set(SETTINGS_KEY, serde_json::to_value(record)?)
}

// =============================================================================
// Stores
// =============================================================================

/// In-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// Store backed by a JSON object on disk. A missing file is an empty store.
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

    fn read_all(&self) -> Result<serde_json::Map<String, Value>, StorageError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(serde_json::Map::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&text)? {
            Value::Object(map) => Ok(map),
            _ => Err(StorageError::Backend(format!(
                "'{}' does not hold a JSON object",
                self.path.display()
            ))),
        }
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut all = self.read_all()?;
        all.insert(key.to_string(), value);
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(&Value::Object(all))?)?;
        Ok(())
    }
}
