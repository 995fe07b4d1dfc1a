//! The bundled structured-file provider.
//!
//! A [`BinFile`] keeps the whole file in memory: a magic number for its
//! format tag, a JSON schema header describing the group tree, and a
//! contiguous data section with one C-order blob per variable. The layout is
//!
//! ```text
//! [magic][schema length: u64 LE][schema JSON][variable blobs…]
//! ```
//!
//! Blob offsets recorded in the schema are relative to the start of the data
//! section. Everything is flushed through the byte stream on close.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::array_subset::ArraySubset;
use crate::data_type::{AttrValue, DataType, FillValue};
use crate::storage::ByteStreamProvider;

use super::{FileFormat, ProviderError, StructuredFileProvider};

#[derive(Serialize, Deserialize, Debug, Default)]
struct GroupModel {
    #[serde(default)]
    attributes: BTreeMap<String, AttrValue>,
    #[serde(default)]
    dimensions: BTreeMap<String, DimensionModel>,
    #[serde(default)]
    variables: BTreeMap<String, VariableModel>,
    #[serde(default)]
    groups: BTreeMap<String, GroupModel>,
}

#[derive(Serialize, Deserialize, Debug)]
struct DimensionModel {
    /// Declared length, [`None`] for unlimited.
    length: Option<u64>,
    /// Current length; grows monotonically for unlimited dimensions.
    current: u64,
}

#[derive(Serialize, Deserialize, Debug)]
struct VariableModel {
    data_type: DataType,
    dimensions: Vec<String>,
    #[serde(default)]
    attributes: BTreeMap<String, AttrValue>,
    fill: Vec<u8>,
    offset: u64,
    nbytes: u64,
    #[serde(skip)]
    data: Vec<u8>,
}

impl VariableModel {
    fn pad_to(&mut self, nbytes: usize) {
        if self.fill.is_empty() {
            self.data.resize(nbytes, 0);
            return;
        }
        while self.data.len() < nbytes {
            self.data.extend_from_slice(&self.fill);
        }
        self.data.truncate(nbytes);
    }
}

/// The bundled structured array file.
pub struct BinFile {
    format: FileFormat,
    stream: Box<dyn ByteStreamProvider>,
    root: GroupModel,
    writable: bool,
}

impl std::fmt::Debug for BinFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinFile")
            .field("format", &self.format)
            .field("writable", &self.writable)
            .finish_non_exhaustive()
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl BinFile {
    /// Create a new empty file over `stream` with the given format tag.
    #[must_use]
    pub fn create(stream: Box<dyn ByteStreamProvider>, format: FileFormat) -> Self {
        Self {
            format,
            stream,
            root: GroupModel::default(),
            writable: true,
        }
    }

    /// Open an existing file from `stream`, detecting its format from the magic number.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the stream cannot be read, the magic number is not
    /// recognised, or the contents cannot be parsed.
    pub fn open(
        mut stream: Box<dyn ByteStreamProvider>,
        writable: bool,
    ) -> Result<Self, ProviderError> {
        let bytes = stream.read_all()?;
        let format = FileFormat::detect(&bytes)?;
        let magic_len = format.magic().len();
        if bytes.len() < magic_len + 8 {
            return Err(ProviderError::Corrupt("truncated header".to_string()));
        }
        let schema_len = u64::from_le_bytes(
            bytes[magic_len..magic_len + 8]
                .try_into()
                .expect("slice of length 8"),
        );
        let schema_len = usize::try_from(schema_len)
            .map_err(|_| ProviderError::Corrupt("schema length out of range".to_string()))?;
        let schema_end = magic_len + 8 + schema_len;
        if bytes.len() < schema_end {
            return Err(ProviderError::Corrupt("truncated schema".to_string()));
        }
        let mut root: GroupModel = serde_json::from_slice(&bytes[magic_len + 8..schema_end])
            .map_err(|err| ProviderError::Corrupt(err.to_string()))?;
        load_data(&mut root, &bytes[schema_end..])?;
        Ok(Self {
            format,
            stream,
            root,
            writable,
        })
    }

    fn group(&self, path: &str) -> Result<&GroupModel, ProviderError> {
        let mut group = &self.root;
        for segment in segments(path) {
            group = group
                .groups
                .get(segment)
                .ok_or_else(|| ProviderError::NoSuchGroup(path.to_string()))?;
        }
        Ok(group)
    }

    fn group_mut(&mut self, path: &str) -> Result<&mut GroupModel, ProviderError> {
        let mut group = &mut self.root;
        for segment in segments(path) {
            group = group
                .groups
                .get_mut(segment)
                .ok_or_else(|| ProviderError::NoSuchGroup(path.to_string()))?;
        }
        Ok(group)
    }

    fn variable(&self, path: &str, name: &str) -> Result<&VariableModel, ProviderError> {
        self.group(path)?
            .variables
            .get(name)
            .ok_or_else(|| ProviderError::NoSuchVariable(name.to_string()))
    }

    fn variable_mut(&mut self, path: &str, name: &str) -> Result<&mut VariableModel, ProviderError> {
        self.group_mut(path)?
            .variables
            .get_mut(name)
            .ok_or_else(|| ProviderError::NoSuchVariable(name.to_string()))
    }

    /// Resolve a dimension visible from the group at `path` (the group or its ancestors),
    /// returning the owning group path.
    fn resolve_dimension(&self, path: &str, name: &str) -> Result<(String, &DimensionModel), ProviderError> {
        let segs: Vec<&str> = segments(path).collect();
        for depth in (0..=segs.len()).rev() {
            let prefix = segs[..depth].join("/");
            let group = self.group(&prefix)?;
            if let Some(dimension) = group.dimensions.get(name) {
                return Ok((prefix, dimension));
            }
        }
        Err(ProviderError::NoSuchDimension(name.to_string()))
    }

    fn resolved_shape(&self, path: &str, dimensions: &[String]) -> Result<Vec<u64>, ProviderError> {
        dimensions
            .iter()
            .map(|name| Ok(self.resolve_dimension(path, name)?.1.current))
            .collect()
    }

    fn require_writable(&self) -> Result<(), ProviderError> {
        if self.writable {
            Ok(())
        } else {
            Err(ProviderError::ReadOnly)
        }
    }

    /// Bring every variable's data buffer in line with its resolved shape.
    fn sync_all(&mut self) {
        let mut targets = Vec::new();
        collect_variables(&self.root, String::new(), &mut targets);
        for (path, name) in targets {
            let Ok(var) = self.variable(&path, &name) else {
                continue;
            };
            let Ok(shape) = self.resolved_shape(&path, &var.dimensions.clone()) else {
                continue;
            };
            let nbytes = shape.iter().product::<u64>() as usize * var.data_type.size();
            if let Ok(var) = self.variable_mut(&path, &name) {
                var.pad_to(nbytes);
            }
        }
    }
}

fn collect_variables(group: &GroupModel, path: String, out: &mut Vec<(String, String)>) {
    for name in group.variables.keys() {
        out.push((path.clone(), name.clone()));
    }
    for (child_name, child) in &group.groups {
        let child_path = if path.is_empty() {
            child_name.clone()
        } else {
            format!("{path}/{child_name}")
        };
        collect_variables(child, child_path, out);
    }
}

fn load_data(group: &mut GroupModel, data_section: &[u8]) -> Result<(), ProviderError> {
    for variable in group.variables.values_mut() {
        let start = usize::try_from(variable.offset)
            .map_err(|_| ProviderError::Corrupt("blob offset out of range".to_string()))?;
        let len = usize::try_from(variable.nbytes)
            .map_err(|_| ProviderError::Corrupt("blob length out of range".to_string()))?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= data_section.len())
            .ok_or_else(|| ProviderError::Corrupt("blob out of bounds".to_string()))?;
        variable.data = data_section[start..end].to_vec();
    }
    for child in group.groups.values_mut() {
        load_data(child, data_section)?;
    }
    Ok(())
}

fn assign_offsets(group: &mut GroupModel, offset: &mut u64) {
    for variable in group.variables.values_mut() {
        variable.offset = *offset;
        variable.nbytes = variable.data.len() as u64;
        *offset += variable.nbytes;
    }
    for child in group.groups.values_mut() {
        assign_offsets(child, offset);
    }
}

fn append_data(group: &GroupModel, payload: &mut Vec<u8>) {
    for variable in group.variables.values() {
        payload.extend_from_slice(&variable.data);
    }
    for child in group.groups.values() {
        append_data(child, payload);
    }
}

fn data_size(group: &GroupModel) -> u64 {
    group
        .variables
        .values()
        .map(|variable| variable.data.len() as u64)
        .sum::<u64>()
        + group.groups.values().map(data_size).sum::<u64>()
}

impl StructuredFileProvider for BinFile {
    fn format(&self) -> FileFormat {
        self.format
    }

    fn create_group(&mut self, path: &str) -> Result<(), ProviderError> {
        self.require_writable()?;
        let mut group = &mut self.root;
        for segment in segments(path) {
            group = group.groups.entry(segment.to_string()).or_default();
        }
        Ok(())
    }

    fn group_exists(&self, path: &str) -> bool {
        self.group(path).is_ok()
    }

    fn list_groups(&self, path: &str) -> Result<Vec<String>, ProviderError> {
        Ok(self.group(path)?.groups.keys().cloned().collect())
    }

    fn create_dimension(
        &mut self,
        path: &str,
        name: &str,
        length: Option<u64>,
    ) -> Result<(), ProviderError> {
        self.require_writable()?;
        let group = self.group_mut(path)?;
        if group.dimensions.contains_key(name) {
            return Err(ProviderError::AlreadyExists(name.to_string()));
        }
        group.dimensions.insert(
            name.to_string(),
            DimensionModel {
                length,
                current: length.unwrap_or(0),
            },
        );
        Ok(())
    }

    fn dimension_length(&self, path: &str, name: &str) -> Result<u64, ProviderError> {
        Ok(self.resolve_dimension(path, name)?.1.current)
    }

    fn dimension_is_unlimited(&self, path: &str, name: &str) -> Result<bool, ProviderError> {
        Ok(self.resolve_dimension(path, name)?.1.length.is_none())
    }

    fn list_dimensions(&self, path: &str) -> Result<Vec<String>, ProviderError> {
        Ok(self.group(path)?.dimensions.keys().cloned().collect())
    }

    fn create_variable(
        &mut self,
        path: &str,
        name: &str,
        data_type: DataType,
        dimensions: &[String],
        fill_value: Option<&FillValue>,
    ) -> Result<(), ProviderError> {
        self.require_writable()?;
        if self.variable_exists(path, name) {
            return Err(ProviderError::AlreadyExists(name.to_string()));
        }
        for (d, dimension) in dimensions.iter().enumerate() {
            let (_, model) = self.resolve_dimension(path, dimension)?;
            if model.length.is_none() && d != 0 {
                return Err(ProviderError::UnlimitedPosition(name.to_string()));
            }
        }
        let shape = self.resolved_shape(path, dimensions)?;
        let fill = fill_value
            .cloned()
            .unwrap_or_else(|| data_type.default_fill_value());
        let nbytes = shape.iter().product::<u64>() as usize * data_type.size();
        let mut variable = VariableModel {
            data_type,
            dimensions: dimensions.to_vec(),
            attributes: BTreeMap::new(),
            fill: fill.as_ne_bytes().to_vec(),
            offset: 0,
            nbytes: 0,
            data: Vec::new(),
        };
        variable.pad_to(nbytes);
        self.group_mut(path)?
            .variables
            .insert(name.to_string(), variable);
        Ok(())
    }

    fn variable_exists(&self, path: &str, name: &str) -> bool {
        self.variable(path, name).is_ok()
    }

    fn variable_data_type(&self, path: &str, name: &str) -> Result<DataType, ProviderError> {
        Ok(self.variable(path, name)?.data_type)
    }

    fn variable_dimensions(&self, path: &str, name: &str) -> Result<Vec<String>, ProviderError> {
        Ok(self.variable(path, name)?.dimensions.clone())
    }

    fn variable_shape(&self, path: &str, name: &str) -> Result<Vec<u64>, ProviderError> {
        let dimensions = self.variable_dimensions(path, name)?;
        self.resolved_shape(path, &dimensions)
    }

    fn list_variables(&self, path: &str) -> Result<Vec<String>, ProviderError> {
        Ok(self.group(path)?.variables.keys().cloned().collect())
    }

    fn rename_variable(&mut self, path: &str, from: &str, to: &str) -> Result<(), ProviderError> {
        self.require_writable()?;
        let group = self.group_mut(path)?;
        if group.variables.contains_key(to) {
            return Err(ProviderError::AlreadyExists(to.to_string()));
        }
        let variable = group
            .variables
            .remove(from)
            .ok_or_else(|| ProviderError::NoSuchVariable(from.to_string()))?;
        group.variables.insert(to.to_string(), variable);
        Ok(())
    }

    fn write_slab(
        &mut self,
        path: &str,
        variable: &str,
        subset: &ArraySubset,
        bytes: &[u8],
    ) -> Result<(), ProviderError> {
        self.require_writable()?;
        let dimensions = self.variable_dimensions(path, variable)?;
        let mut shape = self.resolved_shape(path, &dimensions)?;
        let element_size = self.variable_data_type(path, variable)?.size();

        // Grow an unlimited leading dimension when the write extends past it.
        if !shape.is_empty() && subset.dimensionality() == shape.len() {
            let required = subset.end_exc()[0];
            if required > shape[0] && self.dimension_is_unlimited(path, &dimensions[0])? {
                let (owner, _) = self.resolve_dimension(path, &dimensions[0])?;
                let owner_group = self.group_mut(&owner)?;
                if let Some(model) = owner_group.dimensions.get_mut(&dimensions[0]) {
                    model.current = model.current.max(required);
                }
                shape[0] = required;
            }
        }

        let expected = subset.num_elements_usize() * element_size;
        if bytes.len() != expected {
            return Err(ProviderError::SlabLength {
                got: bytes.len(),
                expected,
            });
        }
        let nbytes = shape.iter().product::<u64>() as usize * element_size;
        let var = self.variable_mut(path, variable)?;
        var.pad_to(nbytes);
        subset.inject_bytes(bytes, &mut var.data, &shape, element_size)?;
        Ok(())
    }

    fn read_slab(
        &self,
        path: &str,
        variable: &str,
        subset: &ArraySubset,
    ) -> Result<Vec<u8>, ProviderError> {
        let dimensions = self.variable_dimensions(path, variable)?;
        let shape = self.resolved_shape(path, &dimensions)?;
        let var = self.variable(path, variable)?;
        let element_size = var.data_type.size();
        let nbytes = shape.iter().product::<u64>() as usize * element_size;
        // The buffer can be stale when a shared unlimited dimension grew through
        // another variable.
        if var.data.len() == nbytes {
            Ok(subset.extract_bytes(&var.data, &shape, element_size)?)
        } else {
            let mut padded = var.data.clone();
            while padded.len() < nbytes {
                padded.extend_from_slice(&var.fill);
            }
            padded.truncate(nbytes);
            Ok(subset.extract_bytes(&padded, &shape, element_size)?)
        }
    }

    fn set_attribute(
        &mut self,
        path: &str,
        variable: Option<&str>,
        name: &str,
        value: AttrValue,
    ) -> Result<(), ProviderError> {
        self.require_writable()?;
        let attributes = match variable {
            Some(variable) => &mut self.variable_mut(path, variable)?.attributes,
            None => &mut self.group_mut(path)?.attributes,
        };
        attributes.insert(name.to_string(), value);
        Ok(())
    }

    fn get_attribute(
        &self,
        path: &str,
        variable: Option<&str>,
        name: &str,
    ) -> Result<Option<AttrValue>, ProviderError> {
        let attributes = match variable {
            Some(variable) => &self.variable(path, variable)?.attributes,
            None => &self.group(path)?.attributes,
        };
        Ok(attributes.get(name).cloned())
    }

    fn delete_attribute(
        &mut self,
        path: &str,
        variable: Option<&str>,
        name: &str,
    ) -> Result<bool, ProviderError> {
        self.require_writable()?;
        let attributes = match variable {
            Some(variable) => &mut self.variable_mut(path, variable)?.attributes,
            None => &mut self.group_mut(path)?.attributes,
        };
        Ok(attributes.remove(name).is_some())
    }

    fn list_attributes(
        &self,
        path: &str,
        variable: Option<&str>,
    ) -> Result<Vec<String>, ProviderError> {
        let attributes = match variable {
            Some(variable) => &self.variable(path, variable)?.attributes,
            None => &self.group(path)?.attributes,
        };
        Ok(attributes.keys().cloned().collect())
    }

    fn size_bytes(&self) -> u64 {
        data_size(&self.root) + 512
    }

    fn close(&mut self) -> Result<(), ProviderError> {
        if !self.writable {
            self.stream.close(None)?;
            return Ok(());
        }
        self.sync_all();
        let mut offset = 0;
        assign_offsets(&mut self.root, &mut offset);
        let schema =
            serde_json::to_vec(&self.root).map_err(|err| ProviderError::Corrupt(err.to_string()))?;
        let magic = self.format.magic();
        let mut payload =
            Vec::with_capacity(magic.len() + 8 + schema.len() + usize::try_from(offset).unwrap_or(0));
        payload.extend_from_slice(magic);
        payload.extend_from_slice(&(schema.len() as u64).to_le_bytes());
        payload.extend_from_slice(&schema);
        append_data(&self.root, &mut payload);
        self.stream.close(Some(&payload))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::storage::{MemoryByteStream, MemoryObjectStore};

    use super::*;

    fn remote_pair() -> (Arc<MemoryObjectStore>, &'static str) {
        (Arc::new(MemoryObjectStore::new()), "s3://h/b/file.nc")
    }

    #[test]
    fn structure_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let (store, key) = remote_pair();

        let stream = Box::new(MemoryByteStream::create_remote(store.clone(), key));
        let mut file = BinFile::create(stream, FileFormat::Hdf5);
        file.create_group("forecast")?;
        file.create_dimension("", "x", Some(4))?;
        file.create_dimension("forecast", "y", Some(3))?;
        file.create_variable(
            "forecast",
            "t",
            DataType::Float32,
            &["x".to_string(), "y".to_string()],
            None,
        )?;
        file.set_attribute("", None, "title", AttrValue::from("test"))?;
        file.set_attribute("forecast", Some("t"), "units", AttrValue::from("K"))?;
        let slab: Vec<u8> = crate::data_type::elements_to_bytes(&[1.0f32, 2.0, 3.0, 4.0]);
        file.write_slab(
            "forecast",
            "t",
            &ArraySubset::new_with_ranges(&[1..3, 0..2]),
            &slab,
        )?;
        file.close()?;

        let stream = Box::new(MemoryByteStream::open_remote(store, key)?);
        let file = BinFile::open(stream, false)?;
        assert_eq!(file.format(), FileFormat::Hdf5);
        assert!(file.size_bytes() >= 4 * 3 * 4);
        assert!(file.group_exists("forecast"));
        assert_eq!(file.dimension_length("forecast", "x")?, 4);
        assert_eq!(file.variable_shape("forecast", "t")?, vec![4, 3]);
        assert_eq!(
            file.get_attribute("forecast", Some("t"), "units")?,
            Some(AttrValue::from("K"))
        );
        assert_eq!(
            file.get_attribute("", None, "title")?,
            Some(AttrValue::from("test"))
        );
        let slab = file.read_slab(
            "forecast",
            "t",
            &ArraySubset::new_with_ranges(&[1..3, 0..2]),
        )?;
        assert_eq!(
            crate::data_type::elements_from_bytes::<f32>(&slab)?,
            vec![1.0, 2.0, 3.0, 4.0]
        );
        // Untouched elements carry the default fill.
        let rest = file.read_slab(
            "forecast",
            "t",
            &ArraySubset::new_with_ranges(&[0..1, 0..1]),
        )?;
        assert!(DataType::Float32.default_fill_value().equals_all(&rest));
        Ok(())
    }

    #[test]
    fn scalar_variable() -> Result<(), Box<dyn std::error::Error>> {
        let stream = Box::new(MemoryByteStream::new());
        let mut file = BinFile::create(stream, FileFormat::Classic);
        file.create_variable("", "s", DataType::Int32, &[], None)?;
        file.write_slab(
            "",
            "s",
            &ArraySubset::new_with_shape(vec![]),
            &7i32.to_ne_bytes(),
        )?;
        let slab = file.read_slab("", "s", &ArraySubset::new_with_shape(vec![]))?;
        assert_eq!(slab, 7i32.to_ne_bytes());
        Ok(())
    }

    #[test]
    fn unlimited_growth() -> Result<(), Box<dyn std::error::Error>> {
        let stream = Box::new(MemoryByteStream::new());
        let mut file = BinFile::create(stream, FileFormat::Classic);
        file.create_dimension("", "time", None)?;
        file.create_dimension("", "x", Some(2))?;
        file.create_variable(
            "",
            "t",
            DataType::Float64,
            &["time".to_string(), "x".to_string()],
            None,
        )?;
        assert_eq!(file.variable_shape("", "t")?, vec![0, 2]);

        let slab = crate::data_type::elements_to_bytes(&[1.0f64, 2.0, 3.0, 4.0]);
        file.write_slab("", "t", &ArraySubset::new_with_ranges(&[0..2, 0..2]), &slab)?;
        assert_eq!(file.variable_shape("", "t")?, vec![2, 2]);
        assert_eq!(file.dimension_length("", "time")?, 2);

        // Unlimited dimensions must come first.
        assert!(matches!(
            file.create_variable(
                "",
                "u",
                DataType::Float64,
                &["x".to_string(), "time".to_string()],
                None,
            ),
            Err(ProviderError::UnlimitedPosition(_))
        ));
        Ok(())
    }

    #[test]
    fn slab_validation() -> Result<(), Box<dyn std::error::Error>> {
        let stream = Box::new(MemoryByteStream::new());
        let mut file = BinFile::create(stream, FileFormat::Classic);
        file.create_dimension("", "x", Some(2))?;
        file.create_variable("", "v", DataType::UInt8, &["x".to_string()], None)?;
        assert!(matches!(
            file.write_slab("", "v", &ArraySubset::new_with_ranges(&[0..2]), &[1]),
            Err(ProviderError::SlabLength { .. })
        ));
        assert!(file
            .write_slab("", "v", &ArraySubset::new_with_ranges(&[1..3]), &[1, 2])
            .is_err());
        assert!(file.read_slab("", "w", &ArraySubset::new_with_ranges(&[0..2])).is_err());
        Ok(())
    }
}
