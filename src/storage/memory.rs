//! A byte stream held in memory.

use std::sync::Arc;

use super::{ByteStreamProvider, MemoryObjectStore, StorageError};

/// A byte stream held in RAM.
///
/// Remote objects are streamed into one of these in full; writes mutate the in-memory buffer and
/// the whole object is uploaded to its store on [`close`](ByteStreamProvider::close). Durability
/// on the remote side is therefore only guaranteed after close.
#[derive(Debug)]
pub struct MemoryByteStream {
    buffer: Vec<u8>,
    position: usize,
    remote: Option<(Arc<MemoryObjectStore>, String)>,
    writable: bool,
}

impl MemoryByteStream {
    /// Create a writable stream over an empty buffer with no backing store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            position: 0,
            remote: None,
            writable: true,
        }
    }

    /// Create a read-only stream over `bytes` with no backing store.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            buffer: bytes,
            position: 0,
            remote: None,
            writable: false,
        }
    }

    /// Create a writable stream that uploads to `store` at `key` on close.
    #[must_use]
    pub fn create_remote(store: Arc<MemoryObjectStore>, key: &str) -> Self {
        Self {
            buffer: Vec::new(),
            position: 0,
            remote: Some((store, key.to_string())),
            writable: true,
        }
    }

    /// Stream the object at `key` in `store` into memory, read only.
    ///
    /// # Errors
    /// Returns [`StorageError::NotFound`] if the object is absent.
    pub fn open_remote(store: Arc<MemoryObjectStore>, key: &str) -> Result<Self, StorageError> {
        let buffer = store.get(key)?;
        Ok(Self {
            buffer,
            position: 0,
            remote: Some((store, key.to_string())),
            writable: false,
        })
    }

    /// Stream the object at `key` in `store` into memory for modification; the buffer is
    /// uploaded back on close.
    ///
    /// # Errors
    /// Returns [`StorageError::NotFound`] if the object is absent.
    pub fn update_remote(store: Arc<MemoryObjectStore>, key: &str) -> Result<Self, StorageError> {
        let buffer = store.get(key)?;
        Ok(Self {
            buffer,
            position: 0,
            remote: Some((store, key.to_string())),
            writable: true,
        })
    }

    /// The current length of the in-memory buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for MemoryByteStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteStreamProvider for MemoryByteStream {
    fn read(&mut self, offset: u64, length: u64) -> Result<Vec<u8>, StorageError> {
        let start = usize::try_from(offset).map_err(|err| err.to_string())?;
        let end = usize::try_from(offset + length).map_err(|err| err.to_string())?;
        if end > self.buffer.len() {
            return Err(StorageError::Other(format!(
                "read {offset}..{end} out of bounds ({} bytes)",
                self.buffer.len()
            )));
        }
        self.position = end;
        Ok(self.buffer[start..end].to_vec())
    }

    fn read_all(&mut self) -> Result<Vec<u8>, StorageError> {
        self.position = self.buffer.len();
        Ok(self.buffer.clone())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        if !self.writable {
            return Err(StorageError::ReadOnly);
        }
        let end = self.position + bytes.len();
        if self.buffer.len() < end {
            self.buffer.resize(end, 0);
        }
        self.buffer[self.position..end].copy_from_slice(bytes);
        self.position = end;
        Ok(())
    }

    fn seek(&mut self, position: u64) -> Result<(), StorageError> {
        self.position = usize::try_from(position).map_err(|err| err.to_string())?;
        Ok(())
    }

    fn close(&mut self, payload: Option<&[u8]>) -> Result<(), StorageError> {
        if let Some(payload) = payload {
            if !self.writable {
                return Err(StorageError::ReadOnly);
            }
            self.buffer = payload.to_vec();
        }
        if self.writable {
            if let Some((store, key)) = &self.remote {
                store.put(key, std::mem::take(&mut self.buffer));
            }
        }
        Ok(())
    }

    fn is_remote(&self) -> bool {
        self.remote.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let mut stream = MemoryByteStream::new();
        stream.write(b"abc")?;
        stream.seek(1)?;
        stream.write(b"xyz")?;
        assert_eq!(stream.read_all()?, b"axyz");
        assert_eq!(stream.read(1, 2)?, b"xy");
        assert!(stream.read(3, 5).is_err());
        Ok(())
    }

    #[test]
    fn remote_upload_on_close() -> Result<(), Box<dyn std::error::Error>> {
        let store = Arc::new(MemoryObjectStore::new());
        let key = "s3://h/b/obj.nc";

        let mut stream = MemoryByteStream::create_remote(store.clone(), key);
        assert!(stream.is_remote());
        stream.write(b"payload")?;
        assert!(!store.exists(key));
        stream.close(None)?;
        assert_eq!(store.get(key)?, b"payload");

        let mut stream = MemoryByteStream::open_remote(store.clone(), key)?;
        assert_eq!(stream.read_all()?, b"payload");
        assert!(stream.write(b"no").is_err());

        assert!(MemoryByteStream::open_remote(store, "s3://h/b/missing").is_err());
        Ok(())
    }
}
