//! Key/value settings stores
//!
//! The settings codec only needs grouped `key -> value` records. Two
//! backends are provided: [`MemoryStore`] and the file-backed [`TomlStore`].

use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A single stored value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoreValue {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// Text
    Text(String),
}

impl StoreValue {
    /// Short name of the value kind, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }
}

impl std::fmt::Display for StoreValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for StoreValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for StoreValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for StoreValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for StoreValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Grouped key/value storage
pub trait SettingsStore {
    /// Read a value, `None` if the key is absent
    fn get(&self, group: &str, key: &str) -> Option<StoreValue>;

    /// Write a value
    fn set(&mut self, group: &str, key: &str, value: StoreValue);

    /// Remove a key; absent keys are ignored
    fn remove(&mut self, group: &str, key: &str);
}

/// In-memory store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryStore {
    groups: BTreeMap<String, BTreeMap<String, StoreValue>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys present in a group, sorted
    pub fn keys(&self, group: &str) -> Vec<&str> {
        self.groups
            .get(group)
            .map(|entries| entries.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, group: &str, key: &str) -> Option<StoreValue> {
        self.groups.get(group)?.get(key).cloned()
    }

    fn set(&mut self, group: &str, key: &str, value: StoreValue) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    fn remove(&mut self, group: &str, key: &str) {
        if let Some(entries) = self.groups.get_mut(group) {
            entries.remove(key);
            if entries.is_empty() {
                self.groups.remove(group);
            }
        }
    }
}

/// Store persisted as a TOML document, one table per group
///
/// Changes stay in memory until [`TomlStore::save`] is called.
#[derive(Debug, Clone)]
pub struct TomlStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl TomlStore {
    /// Open the store at `path`; a missing file yields an empty store
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let inner = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            MemoryStore::new()
        };
        debug!(path = %path.display(), "settings store opened");
        Ok(Self { path, inner })
    }

    /// Open the store in the application config directory
    pub fn open_default() -> Result<Self, ConfigError> {
        let dir = super::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Self::open(dir.join("settings.toml"))
    }

    /// Write the store back to disk
    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(&self.inner)?;
        std::fs::write(&self.path, content)?;
        debug!(path = %self.path.display(), "settings store saved");
        Ok(())
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for TomlStore {
    fn get(&self, group: &str, key: &str) -> Option<StoreValue> {
        self.inner.get(group, key)
    }

    fn set(&mut self, group: &str, key: &str, value: StoreValue) {
        self.inner.set(group, key, value);
    }

    fn remove(&mut self, group: &str, key: &str) {
        self.inner.remove(group, key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let mut store = MemoryStore::new();
        store.set("serial_port", "baudrate", StoreValue::Int(9600));
        assert_eq!(store.get("serial_port", "baudrate"), Some(StoreValue::Int(9600)));
        assert_eq!(store.get("other", "baudrate"), None);

        store.remove("serial_port", "baudrate");
        assert_eq!(store.get("serial_port", "baudrate"), None);
        assert!(store.keys("serial_port").is_empty());
    }

    #[test]
    fn test_toml_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let mut store = TomlStore::open(&path).unwrap();
        store.set("serial_port", "baudrate", StoreValue::Int(115_200));
        store.set("serial_port", "timeout", StoreValue::Float(0.3));
        store.set("serial_port", "xonxoff", StoreValue::Bool(true));
        store.set("serial_port", "parity", StoreValue::from("EVEN"));
        store.save().unwrap();

        let reopened = TomlStore::open(&path).unwrap();
        assert_eq!(reopened.get("serial_port", "baudrate"), Some(StoreValue::Int(115_200)));
        assert_eq!(reopened.get("serial_port", "timeout"), Some(StoreValue::Float(0.3)));
        assert_eq!(reopened.get("serial_port", "xonxoff"), Some(StoreValue::Bool(true)));
        assert_eq!(reopened.get("serial_port", "parity"), Some(StoreValue::from("EVEN")));
    }

    #[test]
    fn test_toml_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();
        assert!(matches!(TomlStore::open(&path), Err(ConfigError::Parse(_))));
    }
}
