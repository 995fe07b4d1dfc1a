//! The open-file table.
//!
//! The [`FileManager`] owns every open subarray file of a dataset: it decides
//! placement (remote files are streamed into memory, local files stay on
//! disk), enforces a global in-memory byte budget with least-recently-used
//! write-back eviction, and allocates result buffers for reads. Variables
//! borrow providers from it for the duration of a slice operation.

use std::sync::Arc;

use lru::LruCache;
use thiserror::Error;

use crate::data_type::{DataType, FillValue};
use crate::storage::{self, MemoryObjectStore, StorageError, StreamMode};
use crate::structured::{BinFile, FileFormat, ProviderError, StructuredFileProvider};
use crate::uri::Uri;

/// The lifecycle state of an open-file record.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FileStatus {
    /// First-time open; the file lives in RAM and must be flushed to its backing store on close.
    NewInMemory,
    /// First-time open; the file was created on the local filesystem.
    NewOnDisk,
    /// An existing remote file streamed into RAM.
    ExistsInMemory,
    /// An existing local file.
    ExistsOnDisk,
    /// A read was requested for a file that is absent on the backing store.
    DoesNotExist,
    /// The record has been flushed and closed.
    Closed,
}

/// The access mode of a file request.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AccessMode {
    /// Read only.
    Read,
    /// Read and write; the file is created if absent.
    Write,
}

/// An entry of the open-file table.
pub struct OpenFileRecord {
    uri: Uri,
    status: FileStatus,
    provider: Option<Box<dyn StructuredFileProvider>>,
    dirty: bool,
    writable: bool,
    size_bytes: u64,
}

impl OpenFileRecord {
    /// The URI of the file.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The lifecycle state of the record.
    #[must_use]
    pub fn status(&self) -> FileStatus {
        self.status
    }

    /// Returns true if the file exists (or is being created) on the backing store.
    #[must_use]
    pub fn exists(&self) -> bool {
        !matches!(self.status, FileStatus::DoesNotExist | FileStatus::Closed)
    }

    /// Returns true if the record holds its file contents in memory.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        matches!(
            self.status,
            FileStatus::NewInMemory | FileStatus::ExistsInMemory
        )
    }

    /// Returns true if the record was first opened by this request (its internal structure has
    /// not been built yet).
    #[must_use]
    pub fn is_new(&self) -> bool {
        matches!(self.status, FileStatus::NewInMemory | FileStatus::NewOnDisk)
    }

    /// The open provider, if the file exists.
    #[must_use]
    pub fn provider(&self) -> Option<&dyn StructuredFileProvider> {
        self.provider.as_deref()
    }

    /// The open provider, mutably.
    #[must_use]
    pub fn provider_mut(&mut self) -> Option<&mut (dyn StructuredFileProvider + '_)> {
        match &mut self.provider {
            Some(provider) => Some(provider.as_mut()),
            None => None,
        }
    }

    /// Record that the file has been modified and must be written back.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl std::fmt::Debug for OpenFileRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenFileRecord")
            .field("uri", &self.uri)
            .field("status", &self.status)
            .field("dirty", &self.dirty)
            .field("size_bytes", &self.size_bytes)
            .finish_non_exhaustive()
    }
}

/// The open-file table of a dataset.
pub struct FileManager {
    table: LruCache<String, OpenFileRecord>,
    memory_limit: u64,
    in_memory_bytes: u64,
    peak_in_memory_bytes: u64,
    object_store: Option<Arc<MemoryObjectStore>>,
}

impl FileManager {
    /// Create a file manager with the given in-memory byte budget, or a default derived from
    /// physical memory.
    #[must_use]
    pub fn new(memory_limit: Option<u64>, object_store: Option<Arc<MemoryObjectStore>>) -> Self {
        Self {
            table: LruCache::unbounded(),
            memory_limit: memory_limit.unwrap_or_else(default_memory_limit),
            in_memory_bytes: 0,
            peak_in_memory_bytes: 0,
            object_store,
        }
    }

    /// The in-memory byte budget.
    #[must_use]
    pub fn memory_limit(&self) -> u64 {
        self.memory_limit
    }

    /// The bytes of in-memory file contents currently held.
    #[must_use]
    pub fn in_memory_bytes(&self) -> u64 {
        self.in_memory_bytes
    }

    /// The largest value [`in_memory_bytes`](Self::in_memory_bytes) has reached.
    #[must_use]
    pub fn peak_in_memory_bytes(&self) -> u64 {
        self.peak_in_memory_bytes
    }

    /// The number of records in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns true if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The object store backing remote URIs, if configured.
    #[must_use]
    pub fn object_store(&self) -> Option<&Arc<MemoryObjectStore>> {
        self.object_store.as_ref()
    }

    /// Return the record for `uri`, opening or creating the file as needed.
    ///
    /// An existing record is promoted in LRU order (and reopened writable if a write upgrade is
    /// needed). Otherwise the file is opened: remote files are streamed into memory subject to
    /// the byte budget (evicting least-recently-used in-memory records, writing back dirty ones);
    /// local files are created or opened on disk. A read request for an absent file yields a
    /// [`FileStatus::DoesNotExist`] record.
    ///
    /// # Errors
    /// Returns [`FileManagerError::ResourceExhausted`] if the budget cannot hold the file even
    /// after evicting every evictable record, or a storage/provider error from opening.
    pub fn request_file(
        &mut self,
        uri: &Uri,
        projected_size: u64,
        mode: AccessMode,
        format: FileFormat,
    ) -> Result<&mut OpenFileRecord, FileManagerError> {
        let key = uri.as_str().to_string();

        let needs_upgrade = match self.table.get(&key) {
            Some(record) => {
                (mode == AccessMode::Write && !record.writable && record.exists())
                    || (mode == AccessMode::Write && record.status == FileStatus::DoesNotExist)
            }
            None => false,
        };
        if needs_upgrade {
            if let Some(mut record) = self.table.pop(&key) {
                if record.is_in_memory() {
                    self.in_memory_bytes = self.in_memory_bytes.saturating_sub(record.size_bytes);
                }
                // Clean by construction; close the stream without flushing structure.
                if record.status != FileStatus::DoesNotExist {
                    close_record(&mut record)?;
                }
            }
        } else if self.table.contains(&key) {
            return Ok(self.table.get_mut(&key).expect("record present"));
        }

        let exists = storage::exists(uri, self.object_store.as_ref())?;
        let record = if !exists && mode == AccessMode::Read {
            OpenFileRecord {
                uri: uri.clone(),
                status: FileStatus::DoesNotExist,
                provider: None,
                dirty: false,
                writable: false,
                size_bytes: 0,
            }
        } else if uri.is_remote() {
            self.make_room(projected_size)?;
            let (provider, status) = if exists {
                let stream_mode = match mode {
                    AccessMode::Read => StreamMode::Read,
                    AccessMode::Write => StreamMode::Update,
                };
                let stream =
                    storage::open_byte_stream(uri, stream_mode, self.object_store.as_ref())?;
                (
                    BinFile::open(stream, mode == AccessMode::Write)?,
                    FileStatus::ExistsInMemory,
                )
            } else {
                let stream =
                    storage::open_byte_stream(uri, StreamMode::Create, self.object_store.as_ref())?;
                (BinFile::create(stream, format), FileStatus::NewInMemory)
            };
            self.in_memory_bytes += projected_size;
            self.peak_in_memory_bytes = self.peak_in_memory_bytes.max(self.in_memory_bytes);
            OpenFileRecord {
                uri: uri.clone(),
                status,
                provider: Some(Box::new(provider)),
                dirty: mode == AccessMode::Write && !exists,
                writable: mode == AccessMode::Write,
                size_bytes: projected_size,
            }
        } else {
            let (provider, status) = if exists {
                let stream_mode = match mode {
                    AccessMode::Read => StreamMode::Read,
                    AccessMode::Write => StreamMode::Update,
                };
                let stream = storage::open_byte_stream(uri, stream_mode, None)?;
                (
                    BinFile::open(stream, mode == AccessMode::Write)?,
                    FileStatus::ExistsOnDisk,
                )
            } else {
                let stream = storage::open_byte_stream(uri, StreamMode::Create, None)?;
                (BinFile::create(stream, format), FileStatus::NewOnDisk)
            };
            OpenFileRecord {
                uri: uri.clone(),
                status,
                provider: Some(Box::new(provider)),
                dirty: mode == AccessMode::Write && !exists,
                writable: mode == AccessMode::Write,
                size_bytes: projected_size,
            }
        };

        self.table.put(key.clone(), record);
        Ok(self.table.get_mut(&key).expect("record just inserted"))
    }

    /// Evict least-recently-used in-memory records until `incoming` more bytes fit the budget.
    fn make_room(&mut self, incoming: u64) -> Result<(), FileManagerError> {
        if incoming > self.memory_limit {
            return Err(FileManagerError::ResourceExhausted {
                limit: self.memory_limit,
                requested: incoming,
            });
        }
        while self.in_memory_bytes + incoming > self.memory_limit {
            let key = self
                .table
                .iter()
                .rev()
                .find(|(_, record)| record.is_in_memory())
                .map(|(key, _)| key.clone());
            let Some(key) = key else {
                return Err(FileManagerError::ResourceExhausted {
                    limit: self.memory_limit,
                    requested: incoming,
                });
            };
            let mut record = self.table.pop(&key).expect("record present");
            close_record(&mut record)?;
            self.in_memory_bytes = self.in_memory_bytes.saturating_sub(record.size_bytes);
        }
        Ok(())
    }

    /// Allocate a result buffer for `shape` elements of `data_type`, initialised to the fill
    /// value if given, zeroed otherwise.
    #[must_use]
    pub fn request_array(
        &self,
        shape: &[u64],
        data_type: DataType,
        fill_value: Option<&FillValue>,
    ) -> Vec<u8> {
        let num_elements = usize::try_from(shape.iter().product::<u64>()).unwrap_or(0);
        match fill_value {
            Some(fill) => fill.as_ne_bytes().repeat(num_elements),
            None => vec![0u8; num_elements * data_type.size()],
        }
    }

    /// Flush and close every record in the table.
    ///
    /// Every new or existing record is written back through its provider; in-memory contents are
    /// uploaded via their byte streams.
    ///
    /// # Errors
    /// Returns the first flush failure; remaining records stay in the table.
    pub fn drain(&mut self) -> Result<(), FileManagerError> {
        while let Some((_, mut record)) = self.table.pop_lru() {
            let was_in_memory = record.is_in_memory();
            if record.status != FileStatus::DoesNotExist {
                close_record(&mut record)?;
            }
            if was_in_memory {
                self.in_memory_bytes = self.in_memory_bytes.saturating_sub(record.size_bytes);
            }
        }
        self.in_memory_bytes = 0;
        Ok(())
    }
}

impl std::fmt::Debug for FileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileManager")
            .field("len", &self.table.len())
            .field("memory_limit", &self.memory_limit)
            .field("in_memory_bytes", &self.in_memory_bytes)
            .finish_non_exhaustive()
    }
}

fn close_record(record: &mut OpenFileRecord) -> Result<(), FileManagerError> {
    if let Some(provider) = &mut record.provider {
        provider.close()?;
    }
    record.provider = None;
    record.status = FileStatus::Closed;
    record.dirty = false;
    Ok(())
}

fn default_memory_limit() -> u64 {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    (system.total_memory() / 8).max(64 * 1024 * 1024)
}

/// A file-manager error.
#[derive(Debug, Error)]
pub enum FileManagerError {
    /// The memory budget cannot be satisfied even after eviction.
    #[error("memory budget of {limit} bytes cannot hold {requested} more bytes")]
    ResourceExhausted {
        /// The configured budget.
        limit: u64,
        /// The bytes requested.
        requested: u64,
    },
    /// An underlying storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// An underlying provider error.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_uri(name: &str) -> Uri {
        Uri::new(&format!("s3://host/bucket/{name}")).unwrap()
    }

    #[test]
    fn absent_read_yields_does_not_exist() -> Result<(), Box<dyn std::error::Error>> {
        let store = Arc::new(MemoryObjectStore::new());
        let mut manager = FileManager::new(Some(1024), Some(store));
        let record = manager.request_file(
            &remote_uri("missing.nc"),
            100,
            AccessMode::Read,
            FileFormat::Hdf5,
        )?;
        assert_eq!(record.status(), FileStatus::DoesNotExist);
        assert!(!record.exists());
        assert!(record.provider().is_none());
        Ok(())
    }

    #[test]
    fn write_creates_in_memory_and_flushes_on_drain() -> Result<(), Box<dyn std::error::Error>> {
        let store = Arc::new(MemoryObjectStore::new());
        let uri = remote_uri("tile.nc");
        let mut manager = FileManager::new(Some(1024), Some(store.clone()));

        let record =
            manager.request_file(&uri, 100, AccessMode::Write, FileFormat::Hdf5)?;
        assert_eq!(record.status(), FileStatus::NewInMemory);
        assert!(record.is_new());
        record
            .provider_mut()
            .unwrap()
            .set_attribute("", None, "touched", crate::data_type::AttrValue::from(1i64))?;
        record.mark_dirty();

        assert!(!store.exists(uri.as_str()));
        manager.drain()?;
        assert!(store.exists(uri.as_str()));
        assert_eq!(manager.in_memory_bytes(), 0);
        Ok(())
    }

    #[test]
    fn eviction_writes_back_and_bounds_memory() -> Result<(), Box<dyn std::error::Error>> {
        let store = Arc::new(MemoryObjectStore::new());
        // Budget of two 100-byte tiles.
        let mut manager = FileManager::new(Some(200), Some(store.clone()));
        for i in 0..5 {
            let uri = remote_uri(&format!("tile.{i}.nc"));
            let record = manager.request_file(&uri, 100, AccessMode::Write, FileFormat::Hdf5)?;
            record.mark_dirty();
        }
        assert!(manager.in_memory_bytes() <= 200);
        assert!(manager.peak_in_memory_bytes() <= 200);
        // The three evicted tiles were written back.
        assert_eq!(store.list().len(), 3);
        manager.drain()?;
        assert_eq!(store.list().len(), 5);
        Ok(())
    }

    #[test]
    fn oversized_request_is_resource_exhausted() {
        let store = Arc::new(MemoryObjectStore::new());
        let mut manager = FileManager::new(Some(50), Some(store));
        let err = manager
            .request_file(&remote_uri("big.nc"), 100, AccessMode::Write, FileFormat::Hdf5)
            .unwrap_err();
        assert!(matches!(err, FileManagerError::ResourceExhausted { .. }));
    }

    #[test]
    fn repeated_request_returns_cached_record() -> Result<(), Box<dyn std::error::Error>> {
        let store = Arc::new(MemoryObjectStore::new());
        let uri = remote_uri("tile.nc");
        let mut manager = FileManager::new(Some(1024), Some(store));
        manager.request_file(&uri, 100, AccessMode::Write, FileFormat::Hdf5)?;
        manager.request_file(&uri, 100, AccessMode::Write, FileFormat::Hdf5)?;
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.in_memory_bytes(), 100);
        Ok(())
    }

    #[test]
    fn local_files_do_not_consume_budget() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::TempDir::new()?;
        let uri = Uri::new(dir.path().join("tile.nc").to_str().unwrap())?;
        let mut manager = FileManager::new(Some(10), None);
        let record = manager.request_file(&uri, 1000, AccessMode::Write, FileFormat::Classic)?;
        assert_eq!(record.status(), FileStatus::NewOnDisk);
        assert_eq!(manager.in_memory_bytes(), 0);
        manager.drain()?;
        assert!(dir.path().join("tile.nc").is_file());
        Ok(())
    }
}
