//! Structured-file providers.
//!
//! A [`StructuredFileProvider`] wraps a [`ByteStreamProvider`] as a
//! hierarchical, self-describing array file: groups, dimensions, variables
//! with typed multidimensional arrays, attributes, and contiguous slab I/O by
//! slice. The engine of this crate never looks below this seam; parsing and
//! emission of real array-format byte layouts belong to external providers.
//!
//! [`BinFile`] is the bundled provider used for masters and subarrays in
//! tests and examples.
//!
//! [`ByteStreamProvider`]: crate::storage::ByteStreamProvider

mod binfile;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::array_subset::{ArraySubset, IncompatibleArraySubsetAndShapeError};
use crate::data_type::{AttrValue, DataType, FillValue};
use crate::storage::StorageError;

pub use binfile::BinFile;

/// The concrete format of an array file.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileFormat {
    /// The classic format.
    Classic,
    /// The classic format with 64-bit offsets.
    Offset64,
    /// The classic format with 64-bit data.
    Data64,
    /// The hierarchical format, v4 variant.
    Hdf4,
    /// The hierarchical format, v5 variant.
    Hdf5,
}

impl FileFormat {
    /// The magic number stamped at the start of a file of this format.
    #[must_use]
    pub const fn magic(&self) -> &'static [u8] {
        match self {
            Self::Classic => b"CDF\x01",
            Self::Offset64 => b"CDF\x02",
            Self::Data64 => b"CDF\x05",
            Self::Hdf4 => b"\x0e\x03\x13\x01",
            Self::Hdf5 => b"\x89HDF\r\n\x1a\n",
        }
    }

    /// Detect the format of a file from its leading bytes.
    ///
    /// # Errors
    /// Returns [`NotRecognisedError`] if the leading bytes match no known array format.
    pub fn detect(head: &[u8]) -> Result<Self, NotRecognisedError> {
        if head.len() >= 4 && &head[1..4] == b"HDF" {
            Ok(Self::Hdf5)
        } else if head.starts_with(Self::Hdf4.magic()) {
            Ok(Self::Hdf4)
        } else if head.starts_with(Self::Classic.magic()) {
            Ok(Self::Classic)
        } else if head.starts_with(Self::Offset64.magic()) {
            Ok(Self::Offset64)
        } else if head.starts_with(Self::Data64.magic()) {
            Ok(Self::Data64)
        } else {
            Err(NotRecognisedError(
                head[..head.len().min(6)].to_vec(),
            ))
        }
    }

    /// Returns true if the format belongs to the classic (pre-hierarchical) family.
    #[must_use]
    pub const fn is_classic(&self) -> bool {
        matches!(self, Self::Classic | Self::Offset64 | Self::Data64)
    }

    /// The file extension used for files of this format.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        "nc"
    }

    /// The name of the format.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Offset64 => "offset64",
            Self::Data64 => "data64",
            Self::Hdf4 => "hdf4",
            Self::Hdf5 => "hdf5",
        }
    }

    /// Parse a format from its name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "classic" => Some(Self::Classic),
            "offset64" => Some(Self::Offset64),
            "data64" => Some(Self::Data64),
            "hdf4" => Some(Self::Hdf4),
            "hdf5" => Some(Self::Hdf5),
            _ => None,
        }
    }
}

/// The leading bytes of a file do not match any recognised array format.
#[derive(Clone, Debug, Error)]
#[error("not a recognised array file (leading bytes {0:02x?})")]
pub struct NotRecognisedError(Vec<u8>);

/// A hierarchical array-file reader/writer over a byte stream.
///
/// Groups are addressed by `/`-separated paths relative to the file root; the empty path is the
/// root group itself. Attribute operations take an optional variable name: [`None`] targets the
/// group.
pub trait StructuredFileProvider {
    /// The format of the file.
    fn format(&self) -> FileFormat;

    /// Create a group at `path`, creating intermediate groups as needed.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the file is read only.
    fn create_group(&mut self, path: &str) -> Result<(), ProviderError>;

    /// Returns true if a group exists at `path`.
    fn group_exists(&self, path: &str) -> bool;

    /// The names of the child groups of the group at `path`.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the group does not exist.
    fn list_groups(&self, path: &str) -> Result<Vec<String>, ProviderError>;

    /// Create a dimension in the group at `path` with `length`, unlimited if [`None`].
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the group does not exist or the dimension already exists.
    fn create_dimension(
        &mut self,
        path: &str,
        name: &str,
        length: Option<u64>,
    ) -> Result<(), ProviderError>;

    /// The current length of a dimension (the grown length for unlimited dimensions).
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the group or dimension does not exist.
    fn dimension_length(&self, path: &str, name: &str) -> Result<u64, ProviderError>;

    /// Returns true if the dimension is unlimited.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the group or dimension does not exist.
    fn dimension_is_unlimited(&self, path: &str, name: &str) -> Result<bool, ProviderError>;

    /// The names of the dimensions of the group at `path`.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the group does not exist.
    fn list_dimensions(&self, path: &str) -> Result<Vec<String>, ProviderError>;

    /// Create a variable in the group at `path` over `dimensions`, which must resolve in the
    /// group or its ancestors. A scalar variable has no dimensions.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the group or a dimension does not exist, or the variable
    /// already exists.
    fn create_variable(
        &mut self,
        path: &str,
        name: &str,
        data_type: DataType,
        dimensions: &[String],
        fill_value: Option<&FillValue>,
    ) -> Result<(), ProviderError>;

    /// Returns true if the variable exists in the group at `path`.
    fn variable_exists(&self, path: &str, name: &str) -> bool;

    /// The data type of a variable.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the group or variable does not exist.
    fn variable_data_type(&self, path: &str, name: &str) -> Result<DataType, ProviderError>;

    /// The dimension names of a variable.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the group or variable does not exist.
    fn variable_dimensions(&self, path: &str, name: &str) -> Result<Vec<String>, ProviderError>;

    /// The current shape of a variable.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the group or variable does not exist.
    fn variable_shape(&self, path: &str, name: &str) -> Result<Vec<u64>, ProviderError>;

    /// The names of the variables of the group at `path`.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the group does not exist.
    fn list_variables(&self, path: &str) -> Result<Vec<String>, ProviderError>;

    /// Rename a variable within its group.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the variable does not exist or the new name collides.
    fn rename_variable(&mut self, path: &str, from: &str, to: &str) -> Result<(), ProviderError>;

    /// Write a contiguous slab of C-order `bytes` at `subset` of a variable. A write beyond the
    /// current length of an unlimited dimension grows it.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the target does not exist, the subset is out of bounds, or
    /// the byte length does not match the subset.
    fn write_slab(
        &mut self,
        path: &str,
        variable: &str,
        subset: &ArraySubset,
        bytes: &[u8],
    ) -> Result<(), ProviderError>;

    /// Read the contiguous slab at `subset` of a variable as C-order bytes.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the target does not exist or the subset is out of bounds.
    fn read_slab(
        &self,
        path: &str,
        variable: &str,
        subset: &ArraySubset,
    ) -> Result<Vec<u8>, ProviderError>;

    /// Set an attribute on a group ([`None`]) or one of its variables.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the target does not exist.
    fn set_attribute(
        &mut self,
        path: &str,
        variable: Option<&str>,
        name: &str,
        value: AttrValue,
    ) -> Result<(), ProviderError>;

    /// Get an attribute of a group ([`None`]) or one of its variables.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the target does not exist.
    fn get_attribute(
        &self,
        path: &str,
        variable: Option<&str>,
        name: &str,
    ) -> Result<Option<AttrValue>, ProviderError>;

    /// Delete an attribute, returning whether it existed.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the target does not exist.
    fn delete_attribute(
        &mut self,
        path: &str,
        variable: Option<&str>,
        name: &str,
    ) -> Result<bool, ProviderError>;

    /// The attribute names of a group ([`None`]) or one of its variables.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the target does not exist.
    fn list_attributes(
        &self,
        path: &str,
        variable: Option<&str>,
    ) -> Result<Vec<String>, ProviderError>;

    /// The approximate in-memory size of the file contents in bytes.
    fn size_bytes(&self) -> u64;

    /// Flush the file through its byte stream and make it durable on the backing store.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if serialisation or the underlying flush fails.
    fn close(&mut self) -> Result<(), ProviderError>;
}

/// A structured-file provider error.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A group does not exist.
    #[error("no such group {0}")]
    NoSuchGroup(String),
    /// A dimension does not exist.
    #[error("no such dimension {0}")]
    NoSuchDimension(String),
    /// A variable does not exist.
    #[error("no such variable {0}")]
    NoSuchVariable(String),
    /// A name is already in use.
    #[error("{0} already exists")]
    AlreadyExists(String),
    /// A write operation was attempted on a read only file.
    #[error("a write operation was attempted on a read only file")]
    ReadOnly,
    /// An unlimited dimension in an unsupported position.
    #[error("variable {0} may only have one unlimited dimension and it must come first")]
    UnlimitedPosition(String),
    /// A slab does not fit the variable.
    #[error(transparent)]
    Subset(#[from] IncompatibleArraySubsetAndShapeError),
    /// The byte length of a slab does not match its subset.
    #[error("slab of {got} bytes does not match subset of {expected} bytes")]
    SlabLength {
        /// Byte length supplied.
        got: usize,
        /// Byte length expected from the subset.
        expected: usize,
    },
    /// The file does not start with a recognised magic number.
    #[error(transparent)]
    NotRecognised(#[from] NotRecognisedError),
    /// The file contents could not be parsed.
    #[error("corrupt file: {0}")]
    Corrupt(String),
    /// An underlying storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_magic() {
        assert_eq!(
            FileFormat::detect(b"CDF\x01rest").unwrap(),
            FileFormat::Classic
        );
        assert_eq!(
            FileFormat::detect(b"CDF\x02rest").unwrap(),
            FileFormat::Offset64
        );
        assert_eq!(
            FileFormat::detect(b"CDF\x05rest").unwrap(),
            FileFormat::Data64
        );
        assert_eq!(
            FileFormat::detect(b"\x89HDF\r\n\x1a\n").unwrap(),
            FileFormat::Hdf5
        );
        assert_eq!(
            FileFormat::detect(b"\x0e\x03\x13\x01").unwrap(),
            FileFormat::Hdf4
        );
        assert!(FileFormat::detect(b"PK\x03\x04hi").is_err());
        assert!(FileFormat::detect(b"CD").is_err());
    }

    #[test]
    fn classic_family() {
        assert!(FileFormat::Classic.is_classic());
        assert!(FileFormat::Offset64.is_classic());
        assert!(FileFormat::Data64.is_classic());
        assert!(!FileFormat::Hdf5.is_classic());
    }
}
