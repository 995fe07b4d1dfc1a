//! Byte-stream providers.
//!
//! A [`ByteStreamProvider`] is the transport seam of the crate: a uniform
//! read/write/seek/close surface over local files and remote objects. The
//! engine never looks below it. [`FileByteStream`] backs local paths,
//! [`MemoryByteStream`] holds remote objects streamed into RAM and uploads
//! them on close, and [`MemoryObjectStore`] is the bundled object-store
//! double used behind remote URIs in tests.

mod file;
mod memory;
mod object_store;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::uri::Uri;

pub use file::FileByteStream;
pub use memory::MemoryByteStream;
pub use object_store::MemoryObjectStore;

/// Uniform byte-level access to a master or subarray file.
pub trait ByteStreamProvider {
    /// Read `length` bytes starting at `offset`.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the range cannot be read.
    fn read(&mut self, offset: u64, length: u64) -> Result<Vec<u8>, StorageError>;

    /// Read the entire stream.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the stream cannot be read.
    fn read_all(&mut self) -> Result<Vec<u8>, StorageError>;

    /// Write `bytes` at the current position.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the stream is read only or the write fails.
    fn write(&mut self, bytes: &[u8]) -> Result<(), StorageError>;

    /// Move the current position to `position`.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the position cannot be set.
    fn seek(&mut self, position: u64) -> Result<(), StorageError>;

    /// Close the stream, replacing its contents with `payload` if given, and make the contents
    /// durable on the backing store.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the flush or upload fails.
    fn close(&mut self, payload: Option<&[u8]>) -> Result<(), StorageError>;

    /// Returns true if the stream is backed by a remote object store.
    fn is_remote(&self) -> bool;

    /// The connect/read timeouts the transport applies per call.
    fn timeouts(&self) -> Timeouts {
        Timeouts::default()
    }
}

/// Per-call transport timeouts advertised by a [`ByteStreamProvider`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// Time allowed to establish a connection.
    pub connect: Duration,
    /// Time allowed for a single read.
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            read: Duration::from_secs(300),
        }
    }
}

/// The mode a byte stream is opened with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StreamMode {
    /// Open an existing file or object read only.
    Read,
    /// Create a new file or object, replacing any existing contents.
    Create,
    /// Open an existing file or object for modification.
    Update,
}

/// Open a byte stream for `uri`.
///
/// Local URIs map to a [`FileByteStream`]; remote URIs map to a [`MemoryByteStream`] bound to
/// `store`.
///
/// # Errors
/// Returns a [`StorageError`] if the target does not exist in [`StreamMode::Read`], if a remote
/// URI has no object store, or on an underlying I/O failure.
pub fn open_byte_stream(
    uri: &Uri,
    mode: StreamMode,
    store: Option<&Arc<MemoryObjectStore>>,
) -> Result<Box<dyn ByteStreamProvider>, StorageError> {
    if uri.is_remote() {
        let store = store
            .ok_or_else(|| StorageError::Other(format!("no object store configured for {uri}")))?;
        Ok(Box::new(match mode {
            StreamMode::Read => MemoryByteStream::open_remote(store.clone(), uri.as_str())?,
            StreamMode::Create => MemoryByteStream::create_remote(store.clone(), uri.as_str()),
            StreamMode::Update => MemoryByteStream::update_remote(store.clone(), uri.as_str())?,
        }))
    } else {
        Ok(Box::new(match mode {
            StreamMode::Read => FileByteStream::open(uri.as_str())?,
            StreamMode::Create => FileByteStream::create(uri.as_str())?,
            StreamMode::Update => FileByteStream::update(uri.as_str())?,
        }))
    }
}

/// Returns true if the file or object at `uri` exists.
///
/// # Errors
/// Returns a [`StorageError`] if a remote URI has no object store.
pub fn exists(uri: &Uri, store: Option<&Arc<MemoryObjectStore>>) -> Result<bool, StorageError> {
    if uri.is_remote() {
        let store = store
            .ok_or_else(|| StorageError::Other(format!("no object store configured for {uri}")))?;
        Ok(store.exists(uri.as_str()))
    } else {
        Ok(std::path::Path::new(uri.as_str()).is_file())
    }
}

/// A storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A write operation was attempted on a read only stream.
    #[error("a write operation was attempted on a read only byte stream")]
    ReadOnly,
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// The key or path does not exist on the backing store.
    #[error("{0} not found on the backing store")]
    NotFound(String),
    /// A transport call exceeded its advertised timeout.
    #[error("transport timeout on {0}")]
    Timeout(String),
    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl From<&str> for StorageError {
    fn from(err: &str) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<String> for StorageError {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}
