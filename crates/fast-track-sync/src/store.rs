//! Client-local key-value storage port.
//!
//! Synchronous on purpose: local writes happen inline with the in-memory
//! mutation, before any remote write is scheduled.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::StoreError;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Keys starting with `prefix`, in key order.
    fn scan(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// In-memory adapter for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

/// All keys in one JSON object on disk, rewritten through a temp file and
/// rename so a crash never leaves a half-written store behind.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entries = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let serialized = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(err) = self.persist(&entries) {
            match previous {
                Some(previous) => entries.insert(key.to_string(), previous),
                None => entries.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        if let Some(previous) = entries.remove(key) {
            if let Err(err) = self.persist(&entries) {
                entries.insert(key.to_string(), previous);
                return Err(err);
            }
        }
        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries
            .lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn memory_scan_honours_prefix() {
        let store = MemoryStore::new();
        store.set("session:b-c-1", "{}").unwrap();
        store.set("session:a-b-2", "{}").unwrap();
        store.set("sessionLinks", "[]").unwrap();
        store.set("other", "x").unwrap();
        assert_eq!(
            store.scan("session:").unwrap(),
            vec!["session:a-b-2".to_string(), "session:b-c-1".to_string()]
        );
        store.delete("session:a-b-2").unwrap();
        assert_eq!(store.get("session:a-b-2").unwrap(), None);
    }

    #[test_timeout::timeout]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");
        {
            let store = FileStore::open(&path).unwrap();
            store.set("session:calm-wolf-7", "{\"id\":1}").unwrap();
            store.set("active_session_id", "calm-wolf-7").unwrap();
            store.delete("active_session_id").unwrap();
        }
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("session:calm-wolf-7").unwrap().as_deref(),
            Some("{\"id\":1}")
        );
        assert_eq!(reopened.get("active_session_id").unwrap(), None);
        assert_eq!(reopened.scan("session:").unwrap().len(), 1);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test_timeout::timeout]
    fn failed_writes_leave_memory_matching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        let store = FileStore::open(nested.join("store.json")).unwrap();
        store.set("session:calm-wolf-7", "{}").unwrap();

        fs::remove_dir_all(&nested).unwrap();
        assert!(store.delete("session:calm-wolf-7").is_err());
        assert_eq!(store.get("session:calm-wolf-7").unwrap().as_deref(), Some("{}"));
        assert!(store.set("session:calm-wolf-7", "{\"v\":2}").is_err());
        assert_eq!(store.get("session:calm-wolf-7").unwrap().as_deref(), Some("{}"));
        assert!(store.set("active_session_id", "calm-wolf-7").is_err());
        assert_eq!(store.get("active_session_id").unwrap(), None);
    }

    #[test_timeout::timeout]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(FileStore::open(&path), Err(StoreError::Serde(_))));
    }
}
