//! Key-value persistence
//!
//! Settings and history logs live in a flat string-keyed store of JSON
//! values. `MemoryStore` is for tests and embedding; `JsonFileStore` keeps
//! the whole map in a single file that is replaced atomically on each write.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::StoreError;

/// A flat JSON key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Values for the requested keys; missing keys are simply absent.
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StoreError>;

    /// Write every entry, replacing existing values. All or nothing.
    fn set(&self, entries: Map<String, Value>) -> Result<(), StoreError>;
}

/// In-memory store; contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Map<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StoreError> {
        let data = self.data.read().map_err(|_| StoreError::Poisoned)?;
        Ok(pick(&data, keys))
    }

    fn set(&self, entries: Map<String, Value>) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(|_| StoreError::Poisoned)?;
        data.extend(entries);
        Ok(())
    }
}

/// Store backed by one JSON object file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// The file is created on first write; a missing file reads as empty.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Map<String, Value>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            key: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn persist(&self, data: &Map<String, Value>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(data)?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "store written");
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(pick(&self.load()?, keys))
    }

    fn set(&self, entries: Map<String, Value>) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut data = self.load()?;
        data.extend(entries);
        self.persist(&data)
    }
}

fn pick(data: &Map<String, Value>, keys: &[&str]) -> Map<String, Value> {
    keys.iter()
        .filter_map(|k| data.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect()
}
