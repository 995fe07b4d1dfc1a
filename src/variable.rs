//! Dataset variables.
//!
//! A [`Variable`] is either *classical* (its array data lives inline in the
//! master file) or *partitioned* (its data is sharded across subarray files,
//! with the master carrying only partition descriptors). All operations
//! branch on the kind tag.
//!
//! Attributes live in an in-memory overlay that is authoritative for writes;
//! reads that miss the overlay may fall back to the backing file.

pub mod partitioned;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::array_subset::{
    ArraySubset, IncompatibleArraySubsetAndShapeError, IncompatibleDimensionalityError,
};
use crate::data_type::{AttrValue, DataType, FillValue, RawLengthError};
use crate::file_manager::FileManagerError;
use crate::hyperslab::{HyperslabError, NormalisedSlab};
use crate::partition::{PartitionMatrix, PartitioningError};
use crate::structured::{ProviderError, StructuredFileProvider};

pub use partitioned::{PartitionedVariable, SubarrayContext, SubarrayDimension};

/// The storage kind of a variable.
#[derive(Debug)]
pub enum VariableKind {
    /// Array data stored inline in the master file.
    Classical {
        /// The C-order array data.
        data: Vec<u8>,
        /// The shape the data is currently sized to.
        shape: Vec<u64>,
    },
    /// Array data sharded across subarray files.
    Partitioned(PartitionedVariable),
}

/// A dataset variable.
#[derive(Debug)]
pub struct Variable {
    name: String,
    data_type: DataType,
    dimensions: Vec<String>,
    fill_value: FillValue,
    attributes: BTreeMap<String, AttrValue>,
    kind: VariableKind,
}

impl Variable {
    /// Create a classical variable sized to `shape`, fill-initialised.
    #[must_use]
    pub fn new_classical(
        name: &str,
        data_type: DataType,
        dimensions: Vec<String>,
        shape: Vec<u64>,
        fill_value: Option<FillValue>,
    ) -> Self {
        let fill_value = fill_value.unwrap_or_else(|| data_type.default_fill_value());
        let num_elements = usize::try_from(shape.iter().product::<u64>()).unwrap_or(0);
        let data = fill_value.as_ne_bytes().repeat(num_elements);
        Self {
            name: name.to_string(),
            data_type,
            dimensions,
            fill_value,
            attributes: BTreeMap::new(),
            kind: VariableKind::Classical { data, shape },
        }
    }

    /// Create a partitioned variable over `matrix`.
    #[must_use]
    pub fn new_partitioned(
        name: &str,
        data_type: DataType,
        dimensions: Vec<String>,
        matrix: PartitionMatrix,
        fill_value: Option<FillValue>,
    ) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            dimensions,
            fill_value: fill_value.unwrap_or_else(|| data_type.default_fill_value()),
            attributes: BTreeMap::new(),
            kind: VariableKind::Partitioned(PartitionedVariable::new(matrix)),
        }
    }

    /// The name of the variable.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the variable. In-memory state only; the backing file is updated on dataset close.
    pub fn rename(&mut self, new_name: &str) {
        self.name = new_name.to_string();
    }

    /// The element data type.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// The ordered dimension names.
    #[must_use]
    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }

    /// The fill value.
    #[must_use]
    pub fn fill_value(&self) -> &FillValue {
        &self.fill_value
    }

    /// The storage kind.
    #[must_use]
    pub fn kind(&self) -> &VariableKind {
        &self.kind
    }

    /// Returns true if the variable is partitioned.
    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        matches!(self.kind, VariableKind::Partitioned(_))
    }

    /// The partition matrix of a partitioned variable.
    #[must_use]
    pub fn matrix(&self) -> Option<&PartitionMatrix> {
        match &self.kind {
            VariableKind::Partitioned(partitioned) => Some(partitioned.matrix()),
            VariableKind::Classical { .. } => None,
        }
    }

    /// The partitioned state of the variable, mutably.
    pub(crate) fn partitioned_mut(&mut self) -> Option<&mut PartitionedVariable> {
        match &mut self.kind {
            VariableKind::Partitioned(partitioned) => Some(partitioned),
            VariableKind::Classical { .. } => None,
        }
    }

    /// The partitioned state of the variable.
    pub(crate) fn partitioned(&self) -> Option<&PartitionedVariable> {
        match &self.kind {
            VariableKind::Partitioned(partitioned) => Some(partitioned),
            VariableKind::Classical { .. } => None,
        }
    }

    /// Set an attribute in the in-memory overlay.
    pub fn set_attribute(&mut self, name: &str, value: AttrValue) {
        self.attributes.insert(name.to_string(), value);
    }

    /// Get an attribute from the in-memory overlay.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    /// Get an attribute, falling back from the overlay to the backing file.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the backing lookup itself fails.
    pub fn attribute_or_backing(
        &self,
        name: &str,
        backing: Option<(&dyn StructuredFileProvider, &str)>,
    ) -> Result<Option<AttrValue>, ProviderError> {
        if let Some(value) = self.attributes.get(name) {
            return Ok(Some(value.clone()));
        }
        match backing {
            Some((provider, group_path)) if provider.variable_exists(group_path, &self.name) => {
                provider.get_attribute(group_path, Some(&self.name), name)
            }
            _ => Ok(None),
        }
    }

    /// Delete an attribute from the overlay, returning whether it existed.
    pub fn delete_attribute(&mut self, name: &str) -> bool {
        self.attributes.remove(name).is_some()
    }

    /// The attribute overlay.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, AttrValue> {
        &self.attributes
    }

    /// Mutably borrow the attribute overlay.
    pub fn attributes_mut(&mut self) -> &mut BTreeMap<String, AttrValue> {
        &mut self.attributes
    }

    /// Replace the data of a classical variable. No-op for partitioned variables.
    pub(crate) fn set_classical_data(&mut self, new_data: Vec<u8>, new_shape: Vec<u64>) {
        if let VariableKind::Classical { data, shape } = &mut self.kind {
            *data = new_data;
            *shape = new_shape;
        }
    }

    /// Resize classical data to `shape`, padding new elements with the fill value.
    ///
    /// Used when a shared unlimited dimension has grown through another variable.
    pub(crate) fn sync_classical_shape(&mut self, new_shape: &[u64]) {
        if let VariableKind::Classical { data, shape } = &mut self.kind {
            if shape != new_shape {
                let nbytes = usize::try_from(new_shape.iter().product::<u64>()).unwrap_or(0)
                    * self.data_type.size();
                let fill = self.fill_value.as_ne_bytes();
                if fill.is_empty() {
                    data.resize(nbytes, 0);
                } else {
                    while data.len() < nbytes {
                        data.extend_from_slice(fill);
                    }
                    data.truncate(nbytes);
                }
                *shape = new_shape.to_vec();
            }
        }
    }

    /// Write `data` at the unit-step `subset` of a classical variable.
    ///
    /// # Errors
    /// Returns a [`VariableError`] if the variable is partitioned, the subset is out of bounds,
    /// or `data` does not match the subset.
    pub(crate) fn write_classical(
        &mut self,
        subset: &ArraySubset,
        bytes: &[u8],
    ) -> Result<(), VariableError> {
        let element_size = self.data_type.size();
        match &mut self.kind {
            VariableKind::Classical { data, shape } => {
                subset.inject_bytes(bytes, data, shape, element_size)?;
                Ok(())
            }
            VariableKind::Partitioned(_) => Err(VariableError::WrongKind {
                name: self.name.clone(),
            }),
        }
    }

    /// Read the unit-step `subset` of a classical variable.
    ///
    /// # Errors
    /// Returns a [`VariableError`] if the variable is partitioned or the subset is out of bounds.
    pub(crate) fn read_classical(&self, subset: &ArraySubset) -> Result<Vec<u8>, VariableError> {
        match &self.kind {
            VariableKind::Classical { data, shape } => {
                Ok(subset.extract_bytes(data, shape, self.data_type.size())?)
            }
            VariableKind::Partitioned(_) => Err(VariableError::WrongKind {
                name: self.name.clone(),
            }),
        }
    }

    /// Read the possibly-stepped `slab` of a classical variable.
    ///
    /// # Errors
    /// Returns a [`VariableError`] if the variable is partitioned or the slab is out of bounds.
    pub(crate) fn read_classical_slab(
        &self,
        slab: &NormalisedSlab,
    ) -> Result<Vec<u8>, VariableError> {
        if slab.is_unit() {
            return self.read_classical(&slab.bounding_subset());
        }
        let element_size = self.data_type.size();
        let bounding = slab.bounding_subset();
        let bytes = self.read_classical(&bounding)?;
        Ok(partitioned::gather_strided(
            &bytes,
            bounding.shape(),
            slab.steps(),
            slab.shape(),
            element_size,
        ))
    }
}

/// A variable I/O error.
#[derive(Debug, Error)]
pub enum VariableError {
    /// An invalid slice.
    #[error(transparent)]
    Hyperslab(#[from] HyperslabError),
    /// A slice or subset dimensionality mismatch.
    #[error(transparent)]
    Dimensionality(#[from] IncompatibleDimensionalityError),
    /// A subset does not fit the variable.
    #[error(transparent)]
    Subset(#[from] IncompatibleArraySubsetAndShapeError),
    /// The supplied data does not match the selection.
    #[error("data of {got} bytes does not match the selection of {expected} bytes")]
    DataLength {
        /// Byte length supplied.
        got: usize,
        /// Byte length expected from the selection.
        expected: usize,
    },
    /// A typed view does not match the variable's data type.
    #[error("element type {got} does not match the variable data type {expected}")]
    ElementType {
        /// The element type supplied.
        got: DataType,
        /// The variable data type.
        expected: DataType,
    },
    /// A raw byte buffer with an incompatible length.
    #[error(transparent)]
    RawLength(#[from] RawLengthError),
    /// The operation does not apply to the variable's storage kind.
    #[error("operation does not apply to the storage kind of variable {name}")]
    WrongKind {
        /// The variable name.
        name: String,
    },
    /// An open-file table failure.
    #[error(transparent)]
    FileManager(#[from] FileManagerError),
    /// A structured-file provider failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// A partitioning failure.
    #[error(transparent)]
    Partitioning(#[from] PartitioningError),
    /// A checked internal invariant failed.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classical_write_read() {
        let mut variable = Variable::new_classical(
            "t",
            DataType::Float32,
            vec!["x".to_string()],
            vec![4],
            None,
        );
        assert!(!variable.is_partitioned());
        let subset = ArraySubset::new_with_ranges(&[1..3]);
        let bytes = crate::data_type::elements_to_bytes(&[1.0f32, 2.0]);
        variable.write_classical(&subset, &bytes).unwrap();
        assert_eq!(variable.read_classical(&subset).unwrap(), bytes);

        // Untouched elements hold the fill value.
        let head = variable
            .read_classical(&ArraySubset::new_with_ranges(&[0..1]))
            .unwrap();
        assert!(variable.fill_value().equals_all(&head));
    }

    #[test]
    fn attribute_overlay() {
        let mut variable = Variable::new_classical(
            "t",
            DataType::Float32,
            vec![],
            vec![],
            None,
        );
        variable.set_attribute("units", AttrValue::from("K"));
        variable.set_attribute("units", AttrValue::from("K"));
        assert_eq!(variable.attribute("units"), Some(&AttrValue::from("K")));
        assert_eq!(variable.attributes().len(), 1);
        assert!(variable.delete_attribute("units"));
        assert!(!variable.delete_attribute("units"));
        assert_eq!(
            variable.attribute_or_backing("units", None).unwrap(),
            None
        );
    }

    #[test]
    fn rename_is_in_memory() {
        let mut variable = Variable::new_classical(
            "t",
            DataType::Int32,
            vec![],
            vec![],
            None,
        );
        variable.rename("temperature");
        assert_eq!(variable.name(), "temperature");
    }

    #[test]
    fn sync_classical_shape_pads_with_fill() {
        let mut variable = Variable::new_classical(
            "t",
            DataType::Int32,
            vec!["time".to_string()],
            vec![0],
            Some(FillValue::from(-1i32)),
        );
        variable.sync_classical_shape(&[3]);
        let bytes = variable
            .read_classical(&ArraySubset::new_with_ranges(&[0..3]))
            .unwrap();
        assert_eq!(
            crate::data_type::elements_from_bytes::<i32>(&bytes).unwrap(),
            vec![-1, -1, -1]
        );
    }
}
