//! Key-value storage backends.
//!
//! - InMemoryStore: ephemeral, for tests and simulations
//! - FileStore: hex-encoded JSON snapshot on disk, written on flush
//!
//! `TypedStore` layers bincode encoding over any backend.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// STORAGE TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Key type for storage operations
pub type StorageKey = Vec<u8>;

/// Value type for storage operations
pub type StorageValue = Vec<u8>;

/// Trait for storage backends
pub trait StorageBackend: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<StorageValue>>;

    /// Set a value for a key
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a key, returning whether it existed
    fn delete(&self, key: &[u8]) -> Result<bool>;

    /// Check if a key exists
    fn exists(&self, key: &[u8]) -> Result<bool>;

    /// List all keys with a given prefix
    fn list_prefix(&self, prefix: &[u8]) -> Result<Vec<StorageKey>>;

    /// Flush pending writes to persistent storage
    fn flush(&self) -> Result<()>;

    /// Clear all data
    fn clear(&self) -> Result<()>;
}

fn lock_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Lock(e.to_string())
}

fn sorted_prefix_keys(data: &HashMap<StorageKey, StorageValue>, prefix: &[u8]) -> Vec<StorageKey> {
    let mut keys: Vec<StorageKey> = data.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
    keys.sort();
    keys
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<HashMap<StorageKey, StorageValue>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> Result<usize> {
        Ok(self.data.read().map_err(lock_err)?.len())
    }

    /// Whether the store holds nothing
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl StorageBackend for InMemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<StorageValue>> {
        Ok(self.data.read().map_err(lock_err)?.get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.data.write().map_err(lock_err)?.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        Ok(self.data.write().map_err(lock_err)?.remove(key).is_some())
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.data.read().map_err(lock_err)?.contains_key(key))
    }

    fn list_prefix(&self, prefix: &[u8]) -> Result<Vec<StorageKey>> {
        let data = self.data.read().map_err(lock_err)?;
        Ok(sorted_prefix_keys(&data, prefix))
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.data.write().map_err(lock_err)?.clear();
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILE STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct FileCache {
    entries: HashMap<StorageKey, StorageValue>,
    dirty: bool,
}

/// File-backed storage: everything is cached in memory and written as one
/// JSON document (hex keys and values) on flush or drop
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    cache: RwLock<FileCache>,
}

impl FileStore {
    /// File name used inside the data directory
    pub const FILE_NAME: &'static str = "state.json";

    /// Open (or create) a store under `dir`
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|e| Error::Storage(format!("create {}: {}", dir.display(), e)))?;

        let path = dir.join(Self::FILE_NAME);
        let entries = if path.exists() { Self::read_entries(&path)? } else { HashMap::new() };

        Ok(Self {
            path,
            cache: RwLock::new(FileCache { entries, dirty: false }),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(path: &Path) -> Result<HashMap<StorageKey, StorageValue>> {
        let file = File::open(path).map_err(|e| Error::Storage(format!("open: {}", e)))?;
        let encoded: HashMap<String, String> = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Storage(format!("parse {}: {}", path.display(), e)))?;

        encoded
            .into_iter()
            .map(|(k, v)| {
                let key = hex::decode(&k).map_err(|e| Error::Storage(format!("bad key: {}", e)))?;
                let value = hex::decode(&v).map_err(|e| Error::Storage(format!("bad value: {}", e)))?;
                Ok((key, value))
            })
            .collect()
    }

    fn write_entries(&self, entries: &HashMap<StorageKey, StorageValue>) -> Result<()> {
        let encoded: HashMap<String, String> =
            entries.iter().map(|(k, v)| (hex::encode(k), hex::encode(v))).collect();

        // Write beside the target then rename so a crash never leaves half a file
        let tmp = self.path.with_extension("json.tmp");
        {
            let file = File::create(&tmp).map_err(|e| Error::Storage(format!("create: {}", e)))?;
            serde_json::to_writer_pretty(BufWriter::new(file), &encoded)
                .map_err(|e| Error::Storage(format!("write: {}", e)))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| Error::Storage(format!("rename: {}", e)))
    }
}

impl StorageBackend for FileStore {
    fn get(&self, key: &[u8]) -> Result<Option<StorageValue>> {
        Ok(self.cache.read().map_err(lock_err)?.entries.get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut cache = self.cache.write().map_err(lock_err)?;
        cache.entries.insert(key.to_vec(), value.to_vec());
        cache.dirty = true;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        let mut cache = self.cache.write().map_err(lock_err)?;
        let existed = cache.entries.remove(key).is_some();
        cache.dirty |= existed;
        Ok(existed)
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.cache.read().map_err(lock_err)?.entries.contains_key(key))
    }

    fn list_prefix(&self, prefix: &[u8]) -> Result<Vec<StorageKey>> {
        Ok(sorted_prefix_keys(&self.cache.read().map_err(lock_err)?.entries, prefix))
    }

    fn flush(&self) -> Result<()> {
        let mut cache = self.cache.write().map_err(lock_err)?;
        if cache.dirty {
            self.write_entries(&cache.entries)?;
            cache.dirty = false;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut cache = self.cache.write().map_err(lock_err)?;
        cache.entries.clear();
        cache.dirty = true;
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPED STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Bincode-encoded values over a raw backend
pub struct TypedStore<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> TypedStore<B> {
    /// Wrap a backend
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Get and decode a value
    pub fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.backend.get(key)? {
            Some(data) => bincode::deserialize(&data)
                .map(Some)
                .map_err(|e| Error::Deserialization(format!("{}: {}", String::from_utf8_lossy(key), e))),
            None => Ok(None),
        }
    }

    /// Encode and set a value
    pub fn set<T: Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        let data = bincode::serialize(value).map_err(|e| Error::Serialization(e.to_string()))?;
        self.backend.set(key, &data)
    }

    /// Delete a value
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.backend.delete(key)
    }

    /// Check if a key exists
    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        self.backend.exists(key)
    }

    /// Keys under `prefix`, sorted
    pub fn list_prefix(&self, prefix: &[u8]) -> Result<Vec<StorageKey>> {
        self.backend.list_prefix(prefix)
    }

    /// Flush pending writes
    pub fn flush(&self) -> Result<()> {
        self.backend.flush()
    }

    /// Clear all data
    pub fn clear(&self) -> Result<()> {
        self.backend.clear()
    }

    /// Underlying backend
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// KEYS
// ═══════════════════════════════════════════════════════════════════════════════

/// Key prefixes
pub mod prefixes {
    /// Subscription records, followed by user and market bytes
    pub const SUBSCRIPTION: &[u8] = b"sub:";
    /// Dispatcher record
    pub const DISPATCH: &[u8] = b"dispatch:";
}

/// Concatenate a prefix and key parts
pub fn make_key(prefix: &[u8], parts: &[&[u8]]) -> StorageKey {
    let len = prefix.len() + parts.iter().map(|p| p.len()).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    key.extend_from_slice(prefix);
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryStore::new();
        assert!(store.is_empty().unwrap());

        store.set(b"key1", b"value1").unwrap();
        assert_eq!(store.get(b"key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(store.get(b"missing").unwrap(), None);
        assert!(store.exists(b"key1").unwrap());

        assert!(store.delete(b"key1").unwrap());
        assert!(!store.delete(b"key1").unwrap());
        assert!(!store.exists(b"key1").unwrap());
    }

    #[test]
    fn test_prefix_listing_is_sorted() {
        let store = InMemoryStore::new();
        store.set(b"sub:b", b"2").unwrap();
        store.set(b"sub:a", b"1").unwrap();
        store.set(b"dispatch:state", b"x").unwrap();

        let keys = store.list_prefix(prefixes::SUBSCRIPTION).unwrap();
        assert_eq!(keys, vec![b"sub:a".to_vec(), b"sub:b".to_vec()]);

        store.clear().unwrap();
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_typed_store() {
        let store = TypedStore::new(InMemoryStore::new());
        store.set(b"number", &12345u64).unwrap();
        assert_eq!(store.get::<u64>(b"number").unwrap(), Some(12345));

        store.set(b"pair", &(Some(7u64), "x".to_string())).unwrap();
        let (a, b): (Option<u64>, String) = store.get(b"pair").unwrap().unwrap();
        assert_eq!((a, b.as_str()), (Some(7), "x"));

        store.backend().set(b"junk", &[0xff]).unwrap();
        assert!(matches!(store.get::<String>(b"junk"), Err(Error::Deserialization(_))));
    }

    #[test]
    fn test_make_key() {
        let key = make_key(prefixes::SUBSCRIPTION, &[&b"ab"[..], &b"cd"[..]]);
        assert_eq!(key, b"sub:abcd".to_vec());
    }

    #[test]
    fn test_file_store_persistence() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set(b"persistent", b"data").unwrap();
            store.set(b"gone", b"soon").unwrap();
            store.delete(b"gone").unwrap();
            store.flush().unwrap();
            assert!(store.path().exists());
        }

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"persistent").unwrap(), Some(b"data".to_vec()));
        assert!(!store.exists(b"gone").unwrap());
    }

    #[test]
    fn test_file_store_flushes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set(b"k", b"v").unwrap();
        }
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(FileStore::FILE_NAME), "not json").unwrap();
        assert!(matches!(FileStore::open(dir.path()), Err(Error::Storage(_))));
    }
}
