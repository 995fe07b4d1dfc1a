//! An in-memory object store.
//!
//! The bundled stand-in for a remote object store: whole-object put, range
//! GET, existence checks, and key listing. Remote [`MemoryByteStream`]s
//! upload into one of these on close.
//!
//! [`MemoryByteStream`]: super::MemoryByteStream

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::uri::Uri;

use super::StorageError;

/// An in-memory object store keyed by URI.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bytes` at `key`, replacing any existing object.
    pub fn put(&self, key: &str, bytes: Vec<u8>) {
        self.objects.write().insert(key.to_string(), bytes);
    }

    /// Retrieve the object at `key`.
    ///
    /// # Errors
    /// Returns [`StorageError::NotFound`] if the key is absent.
    pub fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    /// Retrieve `length` bytes of the object at `key` starting at `offset` (a range GET).
    ///
    /// # Errors
    /// Returns [`StorageError::NotFound`] if the key is absent, or [`StorageError::Other`] if the
    /// range is out of bounds.
    pub fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Vec<u8>, StorageError> {
        let objects = self.objects.read();
        let bytes = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let start = usize::try_from(offset).map_err(|err| err.to_string())?;
        let end = usize::try_from(offset + length).map_err(|err| err.to_string())?;
        if end > bytes.len() {
            return Err(StorageError::Other(format!(
                "range {offset}..{end} out of bounds for {key} ({} bytes)",
                bytes.len()
            )));
        }
        Ok(bytes[start..end].to_vec())
    }

    /// Returns true if an object exists at `key`.
    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    /// The size in bytes of the object at `key`.
    #[must_use]
    pub fn size(&self, key: &str) -> Option<u64> {
        self.objects.read().get(key).map(|bytes| bytes.len() as u64)
    }

    /// Remove the object at `key`, returning whether it existed.
    pub fn erase(&self, key: &str) -> bool {
        self.objects.write().remove(key).is_some()
    }

    /// All keys in the store, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    /// All keys matching a wildcard pattern, sorted.
    #[must_use]
    pub fn list_matching(&self, pattern: &str) -> Vec<String> {
        self.objects
            .read()
            .keys()
            .filter(|key| Uri::wildcard_match(pattern, key))
            .cloned()
            .collect()
    }
}
