//! Aggregated datasets.
//!
//! An [`AggregationDataset`] is the master-file-level object: a tree of
//! groups, dimensions, and variables whose partitioned members are sharded
//! across subarray files. Creating a variable with a tiling option makes it
//! partitioned; everything else is classical and stored inline in the master.
//! Closing a write-mode dataset serialises the aggregation metadata into the
//! master and drains the open-file table, flushing every subarray.

use std::sync::Arc;

use thiserror::Error;

use crate::array_subset::IncompatibleDimensionalityError;
use crate::convention::{self, ConventionError, ConventionVersion};
use crate::data_type::{
    elements_from_bytes, elements_to_bytes, AttrValue, DataType, Element, FillValue,
};
use crate::dimension::{Axis, Dimension};
use crate::file_manager::{FileManager, FileManagerError};
use crate::group::{Group, GroupError};
use crate::hyperslab::{Hyperslab, HyperslabError, NormalisedSlab};
use crate::partition::{self, PartitionMatrix, PartitioningError};
use crate::storage::{self, MemoryObjectStore, StorageError, StreamMode};
use crate::structured::{
    BinFile, FileFormat, NotRecognisedError, ProviderError, StructuredFileProvider,
};
use crate::uri::{Uri, UriError};
use crate::variable::{
    SubarrayContext, SubarrayDimension, Variable, VariableError, VariableKind,
};

/// The access mode of a dataset.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum OpenMode {
    /// Read only.
    Read,
    /// Create and write.
    Write,
}

impl OpenMode {
    /// Parse a mode string: `"r"` or `"w"`. Append is not supported.
    ///
    /// # Errors
    /// Returns [`DatasetError::ApiMisuse`] for any other mode, including append.
    pub fn from_mode_str(mode: &str) -> Result<Self, DatasetError> {
        match mode {
            "r" => Ok(Self::Read),
            "w" => Ok(Self::Write),
            "a" | "r+" => Err(DatasetError::ApiMisuse(
                "append mode is not supported".to_string(),
            )),
            other => Err(DatasetError::ApiMisuse(format!("unknown mode {other:?}"))),
        }
    }
}

/// The requested dataset format.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum DatasetFormat {
    /// A plain classic file.
    Classic,
    /// A plain classic file with 64-bit offsets.
    Offset64,
    /// A plain classic file with 64-bit data.
    Data64,
    /// A plain hierarchical file.
    Hdf,
    /// An aggregated master in the classic format.
    AggregatedClassic,
    /// An aggregated master in the hierarchical format.
    AggregatedHdf,
    /// The default: an aggregated hierarchical master.
    #[default]
    Default,
}

impl DatasetFormat {
    /// Resolve to (aggregated, concrete file format).
    #[must_use]
    pub fn resolve(&self) -> (bool, FileFormat) {
        match self {
            Self::Classic => (false, FileFormat::Classic),
            Self::Offset64 => (false, FileFormat::Offset64),
            Self::Data64 => (false, FileFormat::Data64),
            Self::Hdf => (false, FileFormat::Hdf5),
            Self::AggregatedClassic => (true, FileFormat::Classic),
            Self::AggregatedHdf | Self::Default => (true, FileFormat::Hdf5),
        }
    }
}

/// Dataset-wide options.
#[derive(Clone, Default)]
pub struct DatasetOptions {
    /// Global cap on in-memory open-file bytes. Defaults to a fraction of physical memory.
    pub memory_limit: Option<u64>,
    /// Passed through to the structured-file provider.
    pub diskless: bool,
    /// Passed through to the structured-file provider.
    pub persist: bool,
    /// Passed through to the structured-file provider.
    pub keep_weak_ref: bool,
    /// Replace an existing master when creating. On by default.
    pub clobber: Option<bool>,
    object_store: Option<Arc<MemoryObjectStore>>,
}

impl DatasetOptions {
    /// Create default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the in-memory byte budget.
    #[must_use]
    pub fn with_memory_limit(mut self, memory_limit: u64) -> Self {
        self.memory_limit = Some(memory_limit);
        self
    }

    /// Refuse to replace an existing master when creating.
    #[must_use]
    pub fn with_clobber(mut self, clobber: bool) -> Self {
        self.clobber = Some(clobber);
        self
    }

    /// Back remote URIs with `store`.
    #[must_use]
    pub fn with_object_store(mut self, store: Arc<MemoryObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }
}

/// Variable-creation options.
///
/// Supplying either tiling option makes the variable partitioned.
#[derive(Clone, Default)]
pub struct VariableSpec {
    /// Explicit tile shape, honoured exactly.
    pub subarray_shape: Option<Vec<u64>>,
    /// Upper bound on the per-subarray byte size; `0` leaves it unset.
    pub max_subarray_size: u64,
    /// Fill value override.
    pub fill_value: Option<FillValue>,
}

impl VariableSpec {
    /// Create an empty spec: a classical (non-partitioned) variable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tile with an explicit subarray shape.
    #[must_use]
    pub fn with_subarray_shape(mut self, shape: Vec<u64>) -> Self {
        self.subarray_shape = Some(shape);
        self
    }

    /// Bound the per-subarray byte size.
    #[must_use]
    pub fn with_max_subarray_size(mut self, max_bytes: u64) -> Self {
        self.max_subarray_size = max_bytes;
        self
    }

    /// Override the fill value.
    #[must_use]
    pub fn with_fill_value(mut self, fill_value: FillValue) -> Self {
        self.fill_value = Some(fill_value);
        self
    }

    fn is_partitioned(&self) -> bool {
        self.subarray_shape.is_some() || self.max_subarray_size > 0
    }
}

/// An aggregated dataset.
pub struct AggregationDataset {
    uri: Uri,
    mode: OpenMode,
    aggregated: bool,
    file_format: FileFormat,
    convention: ConventionVersion,
    options: DatasetOptions,
    root: Group,
    file_manager: FileManager,
    /// The parsed master, kept open in read mode for attribute fallback.
    master: Option<BinFile>,
    closed: bool,
}

impl AggregationDataset {
    /// Open a dataset at `uri`.
    ///
    /// `mode` is `"r"` or `"w"` (append is rejected). `convention_version` is `"0.4"` or
    /// `"0.5"`; v0.5 with any classic format is rejected. In read mode the master's leading
    /// bytes must pass the magic-number check and the convention recorded in the master takes
    /// precedence.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] on an invalid mode or format combination, an unrecognised
    /// master file, or an underlying storage failure.
    pub fn open(
        uri: &str,
        mode: &str,
        format: DatasetFormat,
        convention_version: &str,
        options: DatasetOptions,
    ) -> Result<Self, DatasetError> {
        let mode = OpenMode::from_mode_str(mode)?;
        match mode {
            OpenMode::Write => Self::create(uri, format, convention_version, options),
            OpenMode::Read => Self::open_existing(uri, format, convention_version, options),
        }
    }

    /// Create a new dataset at `uri` in write mode.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] on an invalid format/convention combination, an existing
    /// master with clobber disabled, or an underlying storage failure.
    pub fn create(
        uri: &str,
        format: DatasetFormat,
        convention_version: &str,
        options: DatasetOptions,
    ) -> Result<Self, DatasetError> {
        let uri = Uri::new(uri)?;
        let convention = ConventionVersion::from_number(convention_version)?;
        let (aggregated, file_format) = format.resolve();
        if convention == ConventionVersion::V0_5 && file_format.is_classic() {
            return Err(DatasetError::FormatMismatch(format!(
                "convention {} requires a hierarchical master",
                convention.tag()
            )));
        }
        if !options.clobber.unwrap_or(true)
            && storage::exists(&uri, options.object_store.as_ref())?
        {
            return Err(DatasetError::ApiMisuse(format!(
                "{uri} exists and clobber is disabled"
            )));
        }
        let file_manager = FileManager::new(options.memory_limit, options.object_store.clone());
        Ok(Self {
            uri,
            mode: OpenMode::Write,
            aggregated,
            file_format,
            convention,
            options,
            root: Group::new("root"),
            file_manager,
            master: None,
            closed: false,
        })
    }

    fn open_existing(
        uri: &str,
        format: DatasetFormat,
        convention_version: &str,
        options: DatasetOptions,
    ) -> Result<Self, DatasetError> {
        let uri = Uri::new(uri)?;
        let requested = ConventionVersion::from_number(convention_version)?;
        let (aggregated, _) = format.resolve();

        let stream = storage::open_byte_stream(&uri, StreamMode::Read, options.object_store.as_ref())?;
        let master = BinFile::open(stream, false)?;
        let file_format = master.format();
        let convention = match convention::detect(&master)? {
            Some(detected) => detected,
            None => requested,
        };
        if convention == ConventionVersion::V0_5 && file_format.is_classic() {
            return Err(DatasetError::FormatMismatch(format!(
                "convention {} requires a hierarchical master",
                convention.tag()
            )));
        }
        let root = convention::parse_master(&master, convention)?;
        let file_manager = FileManager::new(options.memory_limit, options.object_store.clone());
        Ok(Self {
            uri,
            mode: OpenMode::Read,
            aggregated,
            file_format,
            convention,
            options,
            root,
            file_manager,
            master: Some(master),
            closed: false,
        })
    }

    /// The URI of the master.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The access mode.
    #[must_use]
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// The convention version.
    #[must_use]
    pub fn convention(&self) -> ConventionVersion {
        self.convention
    }

    /// The concrete file format of the master and its subarrays.
    #[must_use]
    pub fn file_format(&self) -> FileFormat {
        self.file_format
    }

    /// The root group.
    #[must_use]
    pub fn root(&self) -> &Group {
        &self.root
    }

    /// The root group, mutably.
    pub fn root_mut(&mut self) -> &mut Group {
        &mut self.root
    }

    /// The open-file table.
    #[must_use]
    pub fn file_manager(&self) -> &FileManager {
        &self.file_manager
    }

    /// The options the dataset was opened with.
    #[must_use]
    pub fn options(&self) -> &DatasetOptions {
        &self.options
    }

    /// Enumerate masters matching a URI pattern with `*`/`?` wildcards (read only).
    ///
    /// # Errors
    /// Returns a [`DatasetError`] if a remote pattern has no object store or the local walk
    /// fails.
    pub fn list(
        pattern: &Uri,
        store: Option<&Arc<MemoryObjectStore>>,
    ) -> Result<Vec<Uri>, DatasetError> {
        if pattern.is_remote() {
            let store = store.ok_or_else(|| {
                DatasetError::ApiMisuse(format!("no object store configured for {pattern}"))
            })?;
            return store
                .list_matching(pattern.as_str())
                .iter()
                .map(|key| Ok(Uri::new(key)?))
                .collect();
        }
        if !pattern.has_wildcards() {
            return Ok(if storage::exists(pattern, None)? {
                vec![pattern.clone()]
            } else {
                Vec::new()
            });
        }
        // Walk from the deepest wildcard-free ancestor.
        let pattern_str = pattern.as_str();
        let wildcard_at = pattern_str
            .find(['*', '?'])
            .expect("pattern has wildcards");
        let root = match pattern_str[..wildcard_at].rfind('/') {
            Some(slash) => &pattern_str[..=slash],
            None => "./",
        };
        let mut matches = Vec::new();
        for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|err| {
                DatasetError::Storage(StorageError::Other(err.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path().to_string_lossy().to_string();
            if Uri::wildcard_match(pattern_str, &path) {
                matches.push(Uri::new(&path)?);
            }
        }
        Ok(matches)
    }

    fn require_write(&self) -> Result<(), DatasetError> {
        if self.mode == OpenMode::Write {
            Ok(())
        } else {
            Err(DatasetError::ApiMisuse(
                "dataset is open read only".to_string(),
            ))
        }
    }

    /// Create a group at a `/`-separated `path` under the root, creating intermediates.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] in read mode.
    pub fn create_group(&mut self, path: &str) -> Result<(), DatasetError> {
        self.require_write()?;
        let mut group = &mut self.root;
        for segment in normalise_path(path).split('/').filter(|s| !s.is_empty()) {
            group = match group.group(segment) {
                Some(_) => group.group_mut(segment).expect("group just found"),
                None => group.add_group(segment)?,
            };
        }
        Ok(())
    }

    /// The group at `path` (the empty path is the root).
    #[must_use]
    pub fn group(&self, path: &str) -> Option<&Group> {
        self.root.find(normalise_path(path))
    }

    /// The group at `path`, mutably.
    #[must_use]
    pub fn group_mut(&mut self, path: &str) -> Option<&mut Group> {
        self.root.find_mut(normalise_path(path))
    }

    /// Create a dimension in the group at `group_path` with `length`, unlimited if [`None`].
    ///
    /// # Errors
    /// Returns a [`DatasetError`] in read mode, if the group does not exist, or on a name
    /// collision.
    pub fn create_dimension(
        &mut self,
        group_path: &str,
        name: &str,
        length: Option<u64>,
    ) -> Result<(), DatasetError> {
        self.require_write()?;
        let group = self
            .root
            .find_mut(normalise_path(group_path))
            .ok_or_else(|| DatasetError::ApiMisuse(format!("no such group {group_path:?}")))?;
        group.add_dimension(Dimension::new(name, length))?;
        Ok(())
    }

    /// Create a variable in the group at `group_path` over `dimensions`.
    ///
    /// The variable is partitioned iff `spec` carries `subarray_shape` or a positive
    /// `max_subarray_size`; partitioned variables require an aggregated dataset format and
    /// fixed dimensions.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] in read mode, on unknown dimensions, on a name collision, or
    /// on an invalid tiling.
    pub fn create_variable(
        &mut self,
        group_path: &str,
        name: &str,
        data_type: DataType,
        dimensions: &[&str],
        spec: &VariableSpec,
    ) -> Result<(), DatasetError> {
        self.require_write()?;
        let group_path = normalise_path(group_path);
        let mut shape = Vec::with_capacity(dimensions.len());
        let mut axes = Vec::with_capacity(dimensions.len());
        let mut has_unlimited = false;
        for (d, dim_name) in dimensions.iter().enumerate() {
            let dimension = resolve_dimension(&self.root, group_path, dim_name)
                .ok_or_else(|| DatasetError::ApiMisuse(format!("no such dimension {dim_name:?}")))?;
            if dimension.is_unlimited() {
                if d != 0 {
                    return Err(DatasetError::ApiMisuse(format!(
                        "unlimited dimension {dim_name:?} must come first in variable {name:?}"
                    )));
                }
                has_unlimited = true;
            }
            shape.push(dimension.len());
            axes.push(dimension.axis());
        }

        let dimension_names: Vec<String> = dimensions.iter().map(|d| (*d).to_string()).collect();
        let variable = if spec.is_partitioned() {
            if !self.aggregated {
                return Err(DatasetError::ApiMisuse(format!(
                    "partitioned variable {name:?} requires an aggregated dataset format"
                )));
            }
            if has_unlimited {
                return Err(DatasetError::ApiMisuse(format!(
                    "partitioned variable {name:?} cannot use an unlimited dimension"
                )));
            }
            if dimensions.is_empty() {
                return Err(DatasetError::ApiMisuse(format!(
                    "partitioned variable {name:?} must have at least one dimension"
                )));
            }
            let tile_shape = match &spec.subarray_shape {
                Some(tile_shape) => tile_shape.clone(),
                None => partition::tile_shape_for_max_bytes(
                    &shape,
                    data_type.size(),
                    spec.max_subarray_size,
                    axes.iter().position(|axis| *axis == Axis::T),
                )?,
            };
            let matrix =
                PartitionMatrix::new_regular(shape, tile_shape, self.file_format, name)?;
            Variable::new_partitioned(
                name,
                data_type,
                dimension_names,
                matrix,
                spec.fill_value.clone(),
            )
        } else {
            Variable::new_classical(
                name,
                data_type,
                dimension_names,
                shape,
                spec.fill_value.clone(),
            )
        };
        let group = self
            .root
            .find_mut(group_path)
            .ok_or_else(|| DatasetError::ApiMisuse(format!("no such group {group_path:?}")))?;
        group.add_variable(variable)?;
        Ok(())
    }

    /// Write `bytes` at `slice` of the variable at `variable_path`.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] in read mode, on non-unit steps, on a data length mismatch,
    /// or on an underlying file failure.
    pub fn write_slice(
        &mut self,
        variable_path: &str,
        slice: &Hyperslab,
        bytes: &[u8],
    ) -> Result<(), DatasetError> {
        self.require_write()?;
        let (group_path, name) = split_variable_path(variable_path);
        let (shape, unlimited_first) = self.variable_geometry(group_path, &name)?;

        let slab = if unlimited_first {
            slice.normalise_extending(&shape, Some(0))?
        } else {
            slice.normalise(&shape)?
        };
        slab.require_unit_steps().map_err(VariableError::from)?;
        let element_size = self.variable_data_type(group_path, &name)?.size();
        let expected = usize::try_from(slab.num_elements()).unwrap_or(usize::MAX) * element_size;
        if bytes.len() != expected {
            return Err(VariableError::DataLength {
                got: bytes.len(),
                expected,
            }
            .into());
        }

        let is_partitioned = self
            .group(group_path)
            .and_then(|g| g.variable(&name))
            .is_some_and(Variable::is_partitioned);
        if is_partitioned {
            let mut ctx = SubarrayContext {
                file_manager: &mut self.file_manager,
                master_base: self.uri.strip_extension(),
                dimensions: subarray_dimensions(&self.root, group_path, &name),
            };
            let group = self
                .root
                .find_mut(group_path)
                .ok_or_else(|| DatasetError::ApiMisuse(format!("no such group {group_path:?}")))?;
            let variable = group
                .variable_mut(&name)
                .ok_or_else(|| DatasetError::ApiMisuse(format!("no such variable {name:?}")))?;
            variable.write_partitioned(&slab, bytes, &mut ctx)?;
        } else {
            // Grow an unlimited leading dimension when the write extends past it.
            let mut shape = shape;
            if unlimited_first {
                let required = slab.end_exc()[0];
                if required > shape[0] {
                    let dimensions = self.variable_dimensions(group_path, &name)?;
                    grow_dimension(&mut self.root, group_path, &dimensions[0], required);
                    shape[0] = required;
                }
            }
            let group = self
                .root
                .find_mut(group_path)
                .ok_or_else(|| DatasetError::ApiMisuse(format!("no such group {group_path:?}")))?;
            let variable = group
                .variable_mut(&name)
                .ok_or_else(|| DatasetError::ApiMisuse(format!("no such variable {name:?}")))?;
            variable.sync_classical_shape(&shape);
            variable.write_classical(&slab.bounding_subset(), bytes)?;
        }
        Ok(())
    }

    /// Write typed elements at `slice` of the variable at `variable_path`.
    ///
    /// # Errors
    /// As [`write_slice`](Self::write_slice), plus an element-type mismatch.
    pub fn write_elements<T: Element>(
        &mut self,
        variable_path: &str,
        slice: &Hyperslab,
        elements: &[T],
    ) -> Result<(), DatasetError> {
        let (group_path, name) = split_variable_path(variable_path);
        let data_type = self.variable_data_type(group_path, &name)?;
        if T::DATA_TYPE != data_type {
            return Err(VariableError::ElementType {
                got: T::DATA_TYPE,
                expected: data_type,
            }
            .into());
        }
        self.write_slice(variable_path, slice, &elements_to_bytes(elements))
    }

    /// Read `slice` of the variable at `variable_path` into a freshly allocated C-order byte
    /// buffer shaped to the slice's output shape.
    ///
    /// For a partitioned variable, tiles never written (or whose subarray file is absent on the
    /// backing store) yield the variable's fill value.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] on an invalid slice or an underlying file failure.
    pub fn read_slice(
        &mut self,
        variable_path: &str,
        slice: &Hyperslab,
    ) -> Result<Vec<u8>, DatasetError> {
        let (group_path, name) = split_variable_path(variable_path);
        let (shape, _) = self.variable_geometry(group_path, &name)?;
        let slab: NormalisedSlab = slice.normalise(&shape)?;

        let is_partitioned = self
            .group(group_path)
            .and_then(|g| g.variable(&name))
            .is_some_and(Variable::is_partitioned);
        if is_partitioned {
            let mut ctx = SubarrayContext {
                file_manager: &mut self.file_manager,
                master_base: self.uri.strip_extension(),
                dimensions: subarray_dimensions(&self.root, group_path, &name),
            };
            let group = self
                .root
                .find(group_path)
                .ok_or_else(|| DatasetError::ApiMisuse(format!("no such group {group_path:?}")))?;
            let variable = group
                .variable(&name)
                .ok_or_else(|| DatasetError::ApiMisuse(format!("no such variable {name:?}")))?;
            Ok(variable.read_partitioned(&slab, &mut ctx)?)
        } else {
            let group = self
                .root
                .find_mut(group_path)
                .ok_or_else(|| DatasetError::ApiMisuse(format!("no such group {group_path:?}")))?;
            let variable = group
                .variable_mut(&name)
                .ok_or_else(|| DatasetError::ApiMisuse(format!("no such variable {name:?}")))?;
            variable.sync_classical_shape(&shape);
            Ok(variable.read_classical_slab(&slab)?)
        }
    }

    /// Read `slice` of the variable at `variable_path` as typed elements.
    ///
    /// # Errors
    /// As [`read_slice`](Self::read_slice), plus an element-type mismatch.
    pub fn read_elements<T: Element>(
        &mut self,
        variable_path: &str,
        slice: &Hyperslab,
    ) -> Result<Vec<T>, DatasetError> {
        let (group_path, name) = split_variable_path(variable_path);
        let data_type = self.variable_data_type(group_path, &name)?;
        if T::DATA_TYPE != data_type {
            return Err(VariableError::ElementType {
                got: T::DATA_TYPE,
                expected: data_type,
            }
            .into());
        }
        let bytes = self.read_slice(variable_path, slice)?;
        Ok(elements_from_bytes(&bytes).map_err(VariableError::from)?)
    }

    /// Set an attribute on the variable at `variable_path` (in-memory overlay; persisted on
    /// close).
    ///
    /// # Errors
    /// Returns [`DatasetError::ApiMisuse`] if the variable does not exist.
    pub fn set_variable_attribute(
        &mut self,
        variable_path: &str,
        name: &str,
        value: AttrValue,
    ) -> Result<(), DatasetError> {
        let (group_path, var_name) = split_variable_path(variable_path);
        let variable = self
            .root
            .find_mut(group_path)
            .and_then(|g| g.variable_mut(&var_name))
            .ok_or_else(|| {
                DatasetError::ApiMisuse(format!("no such variable {variable_path:?}"))
            })?;
        variable.set_attribute(name, value);
        Ok(())
    }

    /// Get an attribute of the variable at `variable_path`, falling back from the in-memory
    /// overlay to the master file.
    ///
    /// # Errors
    /// Returns [`DatasetError::ApiMisuse`] if the variable does not exist.
    pub fn variable_attribute(
        &self,
        variable_path: &str,
        name: &str,
    ) -> Result<Option<AttrValue>, DatasetError> {
        let (group_path, var_name) = split_variable_path(variable_path);
        let variable = self
            .group(group_path)
            .and_then(|g| g.variable(&var_name))
            .ok_or_else(|| {
                DatasetError::ApiMisuse(format!("no such variable {variable_path:?}"))
            })?;
        let backing = self
            .master
            .as_ref()
            .map(|master| (master as &dyn StructuredFileProvider, group_path));
        Ok(variable.attribute_or_backing(name, backing)?)
    }

    /// Delete an attribute of the variable at `variable_path`, returning whether it existed in
    /// the overlay.
    ///
    /// # Errors
    /// Returns [`DatasetError::ApiMisuse`] if the variable does not exist.
    pub fn delete_variable_attribute(
        &mut self,
        variable_path: &str,
        name: &str,
    ) -> Result<bool, DatasetError> {
        let (group_path, var_name) = split_variable_path(variable_path);
        let variable = self
            .root
            .find_mut(group_path)
            .and_then(|g| g.variable_mut(&var_name))
            .ok_or_else(|| {
                DatasetError::ApiMisuse(format!("no such variable {variable_path:?}"))
            })?;
        Ok(variable.delete_attribute(name))
    }

    /// The attribute names of the variable at `variable_path` (overlay only).
    ///
    /// # Errors
    /// Returns [`DatasetError::ApiMisuse`] if the variable does not exist.
    pub fn variable_attribute_names(
        &self,
        variable_path: &str,
    ) -> Result<Vec<String>, DatasetError> {
        let (group_path, var_name) = split_variable_path(variable_path);
        let variable = self
            .group(group_path)
            .and_then(|g| g.variable(&var_name))
            .ok_or_else(|| {
                DatasetError::ApiMisuse(format!("no such variable {variable_path:?}"))
            })?;
        Ok(variable.attributes().keys().cloned().collect())
    }

    /// Set a dataset-level attribute (on the root group).
    pub fn set_attribute(&mut self, name: &str, value: AttrValue) {
        self.root
            .attributes_mut()
            .insert(name.to_string(), value);
    }

    /// Get a dataset-level attribute, falling back from the in-memory overlay to the master
    /// file.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] if the backing lookup fails.
    pub fn attribute(&self, name: &str) -> Result<Option<AttrValue>, DatasetError> {
        if let Some(value) = self.root.attributes().get(name) {
            return Ok(Some(value.clone()));
        }
        match &self.master {
            Some(master) => Ok(master.get_attribute("", None, name)?),
            None => Ok(None),
        }
    }

    /// Delete a dataset-level attribute, returning whether it existed in the overlay.
    pub fn delete_attribute(&mut self, name: &str) -> bool {
        self.root.attributes_mut().remove(name).is_some()
    }

    /// Rename the variable at `variable_path`. In-memory only; the master is rewritten on
    /// close.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] in read mode, if the variable does not exist, or on a name
    /// collision.
    pub fn rename_variable(
        &mut self,
        variable_path: &str,
        new_name: &str,
    ) -> Result<(), DatasetError> {
        self.require_write()?;
        let (group_path, var_name) = split_variable_path(variable_path);
        let group = self
            .root
            .find_mut(group_path)
            .ok_or_else(|| DatasetError::ApiMisuse(format!("no such group {group_path:?}")))?;
        group.rename_variable(&var_name, new_name)?;
        Ok(())
    }

    /// Close the dataset.
    ///
    /// In write mode this serialises the group tree and partition metadata into the master and
    /// drains the open-file table, flushing every open subarray to its backing store. Durability
    /// on remote backends is only guaranteed after this call.
    ///
    /// # Errors
    /// Returns the first flush failure.
    pub fn close(mut self) -> Result<(), DatasetError> {
        if self.closed {
            return Ok(());
        }
        if self.mode == OpenMode::Write {
            let stream = storage::open_byte_stream(
                &self.uri,
                StreamMode::Create,
                self.file_manager.object_store(),
            )?;
            let mut master = BinFile::create(stream, self.file_format);
            let version = self.aggregated.then_some(self.convention);
            convention::write_master(&mut master, version, &self.root)?;
            master.close()?;
        }
        self.file_manager.drain()?;
        self.closed = true;
        Ok(())
    }

    fn variable_dimensions(
        &self,
        group_path: &str,
        name: &str,
    ) -> Result<Vec<String>, DatasetError> {
        let variable = self
            .group(group_path)
            .and_then(|g| g.variable(name))
            .ok_or_else(|| DatasetError::ApiMisuse(format!("no such variable {name:?}")))?;
        Ok(variable.dimensions().to_vec())
    }

    fn variable_data_type(&self, group_path: &str, name: &str) -> Result<DataType, DatasetError> {
        let variable = self
            .group(group_path)
            .and_then(|g| g.variable(name))
            .ok_or_else(|| DatasetError::ApiMisuse(format!("no such variable {name:?}")))?;
        Ok(variable.data_type())
    }

    /// The variable's current shape and whether its leading dimension is unlimited.
    fn variable_geometry(
        &self,
        group_path: &str,
        name: &str,
    ) -> Result<(Vec<u64>, bool), DatasetError> {
        let variable = self
            .group(group_path)
            .and_then(|g| g.variable(name))
            .ok_or_else(|| DatasetError::ApiMisuse(format!("no such variable {name:?}")))?;
        if let Some(matrix) = variable.matrix() {
            return Ok((matrix.array_shape().to_vec(), false));
        }
        let mut shape = Vec::with_capacity(variable.dimensions().len());
        let mut unlimited_first = false;
        for (d, dim_name) in variable.dimensions().iter().enumerate() {
            let dimension = resolve_dimension(&self.root, group_path, dim_name)
                .ok_or_else(|| DatasetError::ApiMisuse(format!("no such dimension {dim_name:?}")))?;
            shape.push(dimension.len());
            if d == 0 && dimension.is_unlimited() {
                unlimited_first = true;
            }
        }
        Ok((shape, unlimited_first))
    }
}

impl std::fmt::Debug for AggregationDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationDataset")
            .field("uri", &self.uri)
            .field("mode", &self.mode)
            .field("format", &self.file_format)
            .field("convention", &self.convention.tag())
            .finish_non_exhaustive()
    }
}

/// Strip a leading `/` and the synthetic `root` segment from a user-facing path.
fn normalise_path(path: &str) -> &str {
    let path = path.trim_matches('/');
    path.strip_prefix("root/")
        .or_else(|| (path == "root").then_some(""))
        .unwrap_or(path)
}

/// Split `group/sub/var` into the group path and the variable name.
fn split_variable_path(path: &str) -> (&str, String) {
    let path = normalise_path(path);
    match path.rsplit_once('/') {
        Some((group_path, name)) => (group_path, name.to_string()),
        None => ("", path.to_string()),
    }
}

/// Resolve a dimension visible from the group at `path`: the group itself or its ancestors.
fn resolve_dimension<'a>(root: &'a Group, path: &str, name: &str) -> Option<&'a Dimension> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for depth in (0..=segments.len()).rev() {
        let group = root.find(&segments[..depth].join("/"))?;
        if let Some(dimension) = group.dimension(name) {
            return Some(dimension);
        }
    }
    None
}

fn grow_dimension(root: &mut Group, path: &str, name: &str, length: u64) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for depth in (0..=segments.len()).rev() {
        if let Some(group) = root.find_mut(&segments[..depth].join("/")) {
            if let Some(dimension) = group.dimension_mut(name) {
                dimension.grow_to(length);
                return;
            }
        }
    }
}

/// Gather the per-dimension context a partitioned slice operation materialises into subarray
/// files: names plus the master's coordinate arrays where dimension variables exist.
fn subarray_dimensions(root: &Group, path: &str, variable: &str) -> Vec<SubarrayDimension> {
    let Some(group) = root.find(path) else {
        return Vec::new();
    };
    let Some(variable) = group.variable(variable) else {
        return Vec::new();
    };
    variable
        .dimensions()
        .iter()
        .map(|dim_name| {
            let coordinates = find_coordinate_variable(root, path, dim_name);
            SubarrayDimension {
                name: dim_name.clone(),
                coordinates,
            }
        })
        .collect()
}

/// Find the dimension variable for `name` visible from the group at `path` and return its data.
fn find_coordinate_variable(
    root: &Group,
    path: &str,
    name: &str,
) -> Option<(DataType, Vec<u8>)> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for depth in (0..=segments.len()).rev() {
        let group = root.find(&segments[..depth].join("/"))?;
        if let Some(variable) = group.variable(name) {
            if let VariableKind::Classical { data, .. } = variable.kind() {
                return Some((variable.data_type(), data.clone()));
            }
        }
    }
    None
}

/// A dataset error.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// An invalid argument or operation for the dataset's state.
    #[error("API misuse: {0}")]
    ApiMisuse(String),
    /// A convention/format combination that is not allowed.
    #[error("format mismatch: {0}")]
    FormatMismatch(String),
    /// The master fails the magic-number check.
    #[error(transparent)]
    NotARecognisedFile(#[from] NotRecognisedError),
    /// An underlying byte stream failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A variable I/O failure.
    #[error(transparent)]
    Variable(#[from] VariableError),
    /// A convention serialisation or parse failure.
    #[error(transparent)]
    Convention(#[from] ConventionError),
    /// A structured-file failure.
    #[error(transparent)]
    Provider(ProviderError),
    /// An open-file table failure.
    #[error(transparent)]
    FileManager(#[from] FileManagerError),
    /// An invalid slice.
    #[error(transparent)]
    Hyperslab(#[from] HyperslabError),
    /// A partitioning failure.
    #[error(transparent)]
    Partitioning(#[from] PartitioningError),
    /// A slice dimensionality mismatch.
    #[error(transparent)]
    Dimensionality(#[from] IncompatibleDimensionalityError),
    /// An invalid URI.
    #[error(transparent)]
    Uri(#[from] UriError),
}

impl From<ProviderError> for DatasetError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotRecognised(err) => Self::NotARecognisedFile(err),
            other => Self::Provider(other),
        }
    }
}

impl From<GroupError> for DatasetError {
    fn from(err: GroupError) -> Self {
        Self::ApiMisuse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_strings() {
        assert_eq!(OpenMode::from_mode_str("r").unwrap(), OpenMode::Read);
        assert_eq!(OpenMode::from_mode_str("w").unwrap(), OpenMode::Write);
        assert!(matches!(
            OpenMode::from_mode_str("a"),
            Err(DatasetError::ApiMisuse(_))
        ));
        assert!(OpenMode::from_mode_str("x").is_err());
    }

    #[test]
    fn format_resolution() {
        assert_eq!(DatasetFormat::Default.resolve(), (true, FileFormat::Hdf5));
        assert_eq!(
            DatasetFormat::AggregatedClassic.resolve(),
            (true, FileFormat::Classic)
        );
        assert_eq!(DatasetFormat::Classic.resolve(), (false, FileFormat::Classic));
    }

    #[test]
    fn path_helpers() {
        assert_eq!(normalise_path("/root/forecast"), "forecast");
        assert_eq!(normalise_path("root"), "");
        assert_eq!(normalise_path("forecast"), "forecast");
        assert_eq!(split_variable_path("root/forecast/t"), ("forecast", "t".to_string()));
        assert_eq!(split_variable_path("t"), ("", "t".to_string()));
    }

    #[test]
    fn convention_guard() {
        let err = AggregationDataset::create(
            "/tmp/guard.nc",
            DatasetFormat::AggregatedClassic,
            "0.5",
            DatasetOptions::new(),
        )
        .unwrap_err();
        assert!(matches!(err, DatasetError::FormatMismatch(_)));
    }
}
