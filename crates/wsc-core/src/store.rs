//! Persisted key-value store shared between processes
//!
//! Every editor process on the machine reads and writes the same store. Single
//! entries are replaced atomically and [`KeyValueStore::create`] is an atomic
//! claim; there is no multi-key transaction support, so anything that needs
//! serialization goes through the lock coordinator.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::StoreError;

/// Key prefixes for persisted entries
pub mod keys {
    pub fn lock(authority: &str) -> String {
        format!("lock/{}", authority)
    }

    pub fn helper_config(authority: &str) -> String {
        format!("config/{}", authority)
    }

    pub fn installation(authority: &str) -> String {
        format!("installation/{}", authority)
    }

    pub fn destination(encoded: &str) -> String {
        format!("ssh-dest:{}", encoded)
    }

    pub const LOCK_PREFIX: &str = "lock/";
}

/// String-keyed JSON store
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` if absent
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Write a value only if `key` is absent. Returns whether this call
    /// created the entry; exactly one of several racing creators wins.
    fn create(&self, key: &str, value: Value) -> Result<bool, StoreError>;

    /// Remove a value; removing an absent key is not an error
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All keys starting with `prefix`, sorted
    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Typed helpers over any store
pub trait StoreExt {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError>;
    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError>;
    fn create_json<T: Serialize>(&self, key: &str, value: &T) -> Result<bool, StoreError>;
}

impl<S: KeyValueStore + ?Sized> StoreExt for S {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.set(key, serde_json::to_value(value)?)
    }

    fn create_json<T: Serialize>(&self, key: &str, value: &T) -> Result<bool, StoreError> {
        self.create(key, serde_json::to_value(value)?)
    }
}

const ENTRY_EXTENSION: &str = "json";

/// Directory store with one JSON file per key.
///
/// File names are the hex encoded key, so any key is a valid name. Every
/// write goes through a temp file in the same directory and is then moved
/// into place, so readers never see a partial entry and writers to different
/// keys never touch each other's files.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store at `{state_dir}/state/`
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join("state"))
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// File backing `key`
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", hex::encode(key.as_bytes()), ENTRY_EXTENSION))
    }

    fn key_for(file_name: &str) -> Option<String> {
        let stem = file_name.strip_suffix(".json")?;
        let bytes = hex::decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }

    /// Serialize `value` into a fresh temp file next to the entries
    fn write_temp(&self, value: &Value) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!(
            ".{}.{:08x}.tmp",
            std::process::id(),
            rand::random::<u32>()
        ));
        let bytes = serde_json::to_vec_pretty(value)?;
        if let Err(e) = fs::write(&tmp, bytes) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(tmp)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match fs::read(self.entry_path(key)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let tmp = self.write_temp(&value)?;
        if let Err(e) = fs::rename(&tmp, self.entry_path(key)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn create(&self, key: &str, value: Value) -> Result<bool, StoreError> {
        let tmp = self.write_temp(&value)?;
        // A hard link fails if the target exists, and the target only ever
        // appears with its full contents
        let linked = fs::hard_link(&tmp, self.entry_path(key));
        let _ = fs::remove_file(&tmp);
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Some(key) = entry.file_name().to_str().and_then(Self::key_for) else {
                continue;
            };
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-process store, used by tests and one-shot commands
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn create(&self, key: &str, value: Value) -> Result<bool, StoreError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(true)
            }
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }
}
