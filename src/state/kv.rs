//! Key-value storage
//!
//! Two things go through this seam: the local cache (favorites, pro flag,
//! session, first-launch flags) and the shared channel the widget reads its
//! snapshot from. Values are JSON text; there are no transactions.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::error::VaultError;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, VaultError>;

    fn set(&self, key: &str, value: &str) -> Result<(), VaultError>;

    fn remove(&self, key: &str) -> Result<(), VaultError>;
}

impl dyn KeyValueStore {
    /// Read and decode a JSON value. Missing keys are `Ok(None)`.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, VaultError> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), VaultError> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw)
    }

    /// Missing or unreadable flags read as `false`.
    pub fn get_bool(&self, key: &str) -> bool {
        match self.get_json::<bool>(key) {
            Ok(value) => value.unwrap_or(false),
            Err(e) => {
                warn!(key, error = %e, "Unreadable flag, treating as unset");
                false
            }
        }
    }

    pub fn set_bool(&self, key: &str, value: bool) -> Result<(), VaultError> {
        self.set_json(key, &value)
    }
}

/// One JSON file per key inside a directory.
/// Writes go to a temp file and are renamed into place, so an out-of-process
/// reader never sees a half-written value.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, VaultError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, VaultError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), VaultError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), VaultError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store for tests and throwaway sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, VaultError> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), VaultError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), VaultError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_file_store_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(dir.path()).unwrap());
        store.set_json("communityFavorites", &vec!["a", "b"]).unwrap();

        let reopened: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(dir.path()).unwrap());
        let values: Option<Vec<String>> = reopened.get_json("communityFavorites").unwrap();
        assert_eq!(values, Some(vec!["a".to_string(), "b".to_string()]));
        assert!(!dir.path().join("communityFavorites.json.tmp").exists());
    }

    #[test]
    fn test_missing_key_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert_eq!(store.get("absent").unwrap(), None);
        store.set("k", "1").unwrap();
        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_keys_are_sanitized_into_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        store.set("group/app:key", "true").unwrap();
        assert!(dir.path().join("group_app_key.json").exists());
    }

    #[test]
    fn test_bool_flags() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        assert!(!store.get_bool("isPro"));
        store.set_bool("isPro", true).unwrap();
        assert!(store.get_bool("isPro"));
        store.set("isPro", "not json").unwrap();
        assert!(!store.get_bool("isPro"));
    }
}
