//! Key-value stores for compiled kernel binaries.
//!
//! The GPU runtime only relies on `get`/`put`; persistence happens on
//! `flush`, normally once during orderly shutdown.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{CoreError, Result};

/// Opaque byte store keyed by canonical build keys.
pub trait KvStorage: Send {
    /// Read persisted entries. Calling it again is a no-op.
    fn load(&mut self) -> Result<()>;

    fn get(&self, key: &str) -> Option<Vec<u8>>;

    fn put(&mut self, key: &str, value: Vec<u8>);

    /// Persist every `put` since the last flush.
    fn flush(&mut self) -> Result<()>;
}

/// Process-local store; nothing survives the process.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStorage {
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

impl KvStorage for MemoryStorage {
    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: Vec<u8>) {
        self.entries.insert(key.to_string(), value);
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

const STORAGE_MAGIC: [u8; 4] = *b"NNKC";
const STORAGE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StorageFile {
    magic: [u8; 4],
    version: u32,
    entries: BTreeMap<String, Vec<u8>>,
}

/// Single-file store, bincode encoded.
///
/// A missing file loads as empty. A corrupt or foreign file also loads as
/// empty (with a warning) and is overwritten on the next flush.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: BTreeMap<String, Vec<u8>>,
    loaded: bool,
    dirty: bool,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
            loaded: false,
            dirty: false,
        }
    }

    /// Open and load `path` in one step.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut storage = Self::new(path);
        storage.load()?;
        Ok(storage)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Iterate `(key, value)` pairs in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn decode(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
        let file: StorageFile = bincode::deserialize(bytes)?;
        if file.magic != STORAGE_MAGIC {
            return Err(CoreError::Storage("bad magic".into()));
        }
        if file.version != STORAGE_VERSION {
            return Err(CoreError::Storage(format!(
                "unsupported version {} (expected {})",
                file.version, STORAGE_VERSION
            )));
        }
        Ok(file.entries)
    }
}

impl KvStorage for FileStorage {
    fn load(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        self.loaded = true;

        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("kernel cache {} does not exist yet", self.path.display());
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        match Self::decode(&bytes) {
            Ok(entries) => {
                tracing::debug!(
                    "loaded {} cached programs from {}",
                    entries.len(),
                    self.path.display()
                );
                // Entries put before load take precedence over stale file data.
                for (key, value) in entries {
                    self.entries.entry(key).or_insert(value);
                }
            }
            Err(err) => {
                tracing::warn!(
                    "ignoring unreadable kernel cache {}: {}",
                    self.path.display(),
                    err
                );
                self.dirty = true;
            }
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: Vec<u8>) {
        self.entries.insert(key.to_string(), value);
        self.dirty = true;
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };

        let file = StorageFile {
            magic: STORAGE_MAGIC,
            version: STORAGE_VERSION,
            entries: std::mem::take(&mut self.entries),
        };
        let encoded = bincode::serialize(&file);
        self.entries = file.entries;
        let encoded = encoded?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&encoded)?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        self.dirty = false;
        tracing::debug!(
            "flushed {} cached programs ({} bytes) to {}",
            self.entries.len(),
            encoded.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage() {
        let mut storage = MemoryStorage::new();
        assert!(storage.get("a").is_none());
        storage.put("a", vec![1, 2, 3]);
        assert_eq!(storage.get("a"), Some(vec![1, 2, 3]));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("programs.bin");

        let mut storage = FileStorage::open(&path).unwrap();
        assert!(storage.is_empty());
        storage.put("conv -DX=1", vec![7; 16]);
        storage.flush().unwrap();
        assert!(path.exists());

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get("conv -DX=1"), Some(vec![7; 16]));
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_flush_without_changes_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("programs.bin");
        let mut storage = FileStorage::open(&path).unwrap();
        storage.flush().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("programs.bin");
        fs::write(&path, b"definitely not a cache").unwrap();

        let mut storage = FileStorage::open(&path).unwrap();
        assert!(storage.is_empty());
        storage.put("k", vec![1]);
        storage.flush().unwrap();
        assert_eq!(FileStorage::open(&path).unwrap().get("k"), Some(vec![1]));
    }

    #[test]
    fn test_flush_leaves_only_the_cache_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("programs.tmp");

        let mut storage = FileStorage::open(&path).unwrap();
        storage.put("relu", vec![3; 8]);
        storage.flush().unwrap();
        storage.put("sigmoid", vec![4; 8]);
        storage.flush().unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("programs.tmp")]);

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get("relu"), Some(vec![3; 8]));
        assert_eq!(reopened.get("sigmoid"), Some(vec![4; 8]));
    }

    #[test]
    fn test_entries_sorted() {
        let mut storage = FileStorage::new("unused.bin");
        storage.put("b", vec![2]);
        storage.put("a", vec![1]);
        let keys: Vec<_> = storage.entries().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
