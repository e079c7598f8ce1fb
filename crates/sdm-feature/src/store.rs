// store.rs — Generic string-keyed JSON stores.
//
// The feature store only ever needs `save(key, value)` and `load(key)`.
// JsonFileStore keeps one JSON file per key in a directory. Keys are
// arbitrary strings (repository URLs among them), so the file name is the
// SHA-256 of the key and the key itself is kept inside the envelope.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::StoreError;

/// Get/put by string key. Last write wins.
pub trait Store: Send + Sync {
    fn save(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    /// `Ok(None)` for a key never saved.
    fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;
}

/// Process-local store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys currently stored, sorted.
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

impl Store for InMemoryStore {
    fn save(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }
}

/// On-disk form of one entry.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    key: String,
    value: Value,
}

/// Directory-backed store: `<dir>/<sha256(key)>.json`.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open a store in `dir`, creating the directory if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::IoError {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_file(&self, key: &str) -> PathBuf {
        let name = format!("{:x}", Sha256::digest(key.as_bytes()));
        self.dir.join(format!("{}.json", name))
    }
}

impl Store for JsonFileStore {
    fn save(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.entry_file(key);
        let envelope = Envelope {
            key: key.to_string(),
            value: value.clone(),
        };
        let json = serde_json::to_string_pretty(&envelope)?;

        let _guard = self.write_lock.lock().map_err(|_| StoreError::LockPoisoned)?;
        fs::write(&path, json).map_err(|source| StoreError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(key = %key, path = %path.display(), "saved store entry");
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.entry_file(key);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path).map_err(|source| StoreError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        let envelope: Envelope = serde_json::from_str(&json)?;
        if envelope.key != key {
            // Digest collision; treat as absent rather than return another key's value.
            tracing::warn!(key = %key, stored = %envelope.key, "store entry key mismatch");
            return Ok(None);
        }
        Ok(Some(envelope.value))
    }
}
