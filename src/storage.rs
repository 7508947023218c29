//! Blob storage collaborators.
//!
//! Persistence is an external concern reached through the opaque
//! [`BlobStore`] contract: `put`/`get` on namespaced keys, with the
//! orchestrator owning all (de)serialization. Two backends ship with the
//! crate — an in-memory store for tests and temporary datasets, and a
//! directory-backed store for simple local persistence.

use std::fs;
use std::path::PathBuf;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::error::{CartographError, Result};

/// Build a namespaced artifact key, `{namespace}/{id}`.
pub fn artifact_key(namespace: &str, id: &str) -> String {
    format!("{namespace}/{id}")
}

/// Opaque keyed blob storage.
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key`, replacing any existing blob.
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Fetch the blob under `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// An in-memory blob store.
///
/// Useful for testing and for datasets that never need to survive the
/// process. Finalized blobs are stored as boxed slices.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<AHashMap<String, Box<[u8]>>>,
}

impl MemoryBlobStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn blob_count(&self) -> usize {
        self.blobs.lock().len()
    }

    /// Total size of all stored blobs in bytes.
    pub fn total_size(&self) -> u64 {
        self.blobs.lock().values().map(|data| data.len() as u64).sum()
    }

    /// Remove all blobs.
    pub fn clear(&self) {
        self.blobs.lock().clear();
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.blobs
            .lock()
            .insert(key.to_string(), data.to_vec().into_boxed_slice());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(key).map(|data| data.to_vec()))
    }
}

/// A directory-backed blob store. Keys map to files below the root, with
/// the namespace separator becoming a subdirectory.
#[derive(Debug)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for component in key.split('/') {
            if component.is_empty() || component == "." || component == ".." {
                return Err(CartographError::storage(format!(
                    "invalid blob key '{key}'"
                )));
            }
            path.push(component);
        }
        Ok(path)
    }
}

impl BlobStore for FileBlobStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryBlobStore::new();
        let key = artifact_key("datasets", "abc");

        assert!(store.get(&key).unwrap().is_none());
        store.put(&key, b"payload").unwrap();
        assert_eq!(store.get(&key).unwrap().as_deref(), Some(b"payload".as_ref()));
        assert_eq!(store.blob_count(), 1);
        assert_eq!(store.total_size(), 7);

        store.clear();
        assert_eq!(store.blob_count(), 0);
    }

    #[test]
    fn test_memory_store_overwrites() {
        let store = MemoryBlobStore::new();
        store.put("k", b"one").unwrap();
        store.put("k", b"two").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some(b"two".as_ref()));
        assert_eq!(store.blob_count(), 1);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path()).unwrap();
        let key = artifact_key("datasets", "abc");

        assert!(store.get(&key).unwrap().is_none());
        store.put(&key, b"payload").unwrap();
        assert_eq!(store.get(&key).unwrap().as_deref(), Some(b"payload".as_ref()));
    }

    #[test]
    fn test_file_store_rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path()).unwrap();
        assert!(store.put("../escape", b"x").is_err());
        assert!(store.get("a//b").is_err());
    }
}
