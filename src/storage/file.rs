//! A byte stream over a local file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{ByteStreamProvider, StorageError};

/// A byte stream backed by a local file.
#[derive(Debug)]
pub struct FileByteStream {
    file: File,
    path: PathBuf,
    writable: bool,
}

impl FileByteStream {
    /// Open an existing file read only.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the file does not exist or cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(StorageError::NotFound(path.display().to_string()));
        }
        let file = File::open(&path)?;
        Ok(Self {
            file,
            path,
            writable: false,
        })
    }

    /// Create a new file, replacing any existing contents and creating parent directories.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            file,
            path,
            writable: true,
        })
    }

    /// Open an existing file for modification.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the file does not exist or cannot be opened.
    pub fn update(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(StorageError::NotFound(path.display().to_string()));
        }
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(Self {
            file,
            path,
            writable: true,
        })
    }

    /// The path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteStreamProvider for FileByteStream {
    fn read(&mut self, offset: u64, length: u64) -> Result<Vec<u8>, StorageError> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut bytes = vec![0u8; usize::try_from(length).map_err(|err| err.to_string())?];
        self.file.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn read_all(&mut self) -> Result<Vec<u8>, StorageError> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        self.file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        if !self.writable {
            return Err(StorageError::ReadOnly);
        }
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn seek(&mut self, position: u64) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    fn close(&mut self, payload: Option<&[u8]>) -> Result<(), StorageError> {
        if let Some(payload) = payload {
            if !self.writable {
                return Err(StorageError::ReadOnly);
            }
            self.file.set_len(0)?;
            self.file.seek(SeekFrom::Start(0))?;
            self.file.write_all(payload)?;
        }
        if self.writable {
            self.file.sync_all()?;
        }
        Ok(())
    }

    fn is_remote(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("nested/stream.bin");

        let mut stream = FileByteStream::create(&path)?;
        stream.write(b"hello ")?;
        stream.write(b"bytes")?;
        stream.close(None)?;

        let mut stream = FileByteStream::open(&path)?;
        assert!(!stream.is_remote());
        assert_eq!(stream.read_all()?, b"hello bytes");
        assert_eq!(stream.read(6, 5)?, b"bytes");
        assert!(stream.write(b"nope").is_err());

        let mut stream = FileByteStream::create(&path)?;
        stream.close(Some(b"replaced"))?;
        let mut stream = FileByteStream::open(&path)?;
        assert_eq!(stream.read_all()?, b"replaced");

        assert!(FileByteStream::open(dir.path().join("missing.bin")).is_err());
        Ok(())
    }
}
