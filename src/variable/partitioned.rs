//! Slice I/O on partitioned variables.
//!
//! A write partitions the supplied data according to the partition index,
//! obtains each target subarray file from the file manager (assigning the
//! tile's file URI on first touch and building the subarray's internal
//! structure), and writes the per-tile slab. A read allocates a
//! fill-initialised result buffer and copies each existing tile's slab into
//! place; tiles that were never written, or whose file is absent on the
//! backing store, are left as fill.

use itertools::Itertools;

use crate::array_subset::{c_order_strides, ArraySubset};
use crate::data_type::DataType;
use crate::file_manager::{AccessMode, FileManager};
use crate::hyperslab::NormalisedSlab;
use crate::partition::{Partition, PartitionMatrix};
use crate::structured::StructuredFileProvider;
use crate::uri::Uri;

use super::{Variable, VariableError};

/// The partitioned state of a variable: its partition matrix.
#[derive(Debug)]
pub struct PartitionedVariable {
    matrix: PartitionMatrix,
}

impl PartitionedVariable {
    /// Create the partitioned state over `matrix`.
    #[must_use]
    pub fn new(matrix: PartitionMatrix) -> Self {
        Self { matrix }
    }

    /// The partition matrix.
    #[must_use]
    pub fn matrix(&self) -> &PartitionMatrix {
        &self.matrix
    }

    /// The partition matrix, mutably.
    pub fn matrix_mut(&mut self) -> &mut PartitionMatrix {
        &mut self.matrix
    }
}

/// A dimension of the variable as materialised into subarray files.
#[derive(Clone, Debug)]
pub struct SubarrayDimension {
    /// The dimension name.
    pub name: String,
    /// The master's full coordinate array for the dimension, if a dimension variable exists.
    pub coordinates: Option<(DataType, Vec<u8>)>,
}

/// Everything a partitioned slice operation needs from its dataset.
pub struct SubarrayContext<'a> {
    /// The dataset's open-file table.
    pub file_manager: &'a mut FileManager,
    /// The master URI with its extension stripped; subarray files are colocated under it.
    pub master_base: Uri,
    /// The variable's dimensions, in order.
    pub dimensions: Vec<SubarrayDimension>,
}

impl Variable {
    /// Write `bytes` at the normalised `slab` of a partitioned variable.
    ///
    /// # Errors
    /// Returns a [`VariableError`] if the slab has non-unit steps, `bytes` does not match the
    /// selection, or a file operation fails.
    pub(crate) fn write_partitioned(
        &mut self,
        slab: &NormalisedSlab,
        bytes: &[u8],
        ctx: &mut SubarrayContext<'_>,
    ) -> Result<(), VariableError> {
        slab.require_unit_steps()?;
        let element_size = self.data_type.size();
        let expected = usize::try_from(slab.num_elements()).unwrap_or(usize::MAX) * element_size;
        if bytes.len() != expected {
            return Err(VariableError::DataLength {
                got: bytes.len(),
                expected,
            });
        }

        let name = self.name.clone();
        let data_type = self.data_type;
        let fill_value = self.fill_value.clone();
        let Some(state) = self.partitioned_mut() else {
            return Err(VariableError::WrongKind { name });
        };
        let matrix = state.matrix_mut();
        let entries = matrix.index(slab)?;
        for entry in entries {
            let partition = matrix
                .partition_mut(&entry.partition)
                .ok_or_else(|| internal("index entry outside the partition matrix"))?;
            if partition.file.is_none() {
                let tile = entry.partition.iter().map(u64::to_string).join(".");
                let file_name =
                    format!("{name}.{tile}.{}", partition.format.extension());
                partition.file = Some(ctx.master_base.join(&file_name));
            }
            let partition = partition.clone();
            let uri = partition
                .file
                .as_ref()
                .ok_or_else(|| internal("file URI was just assigned"))?;

            let projected = partition.num_elements() * element_size as u64;
            let record =
                ctx.file_manager
                    .request_file(uri, projected, AccessMode::Write, partition.format)?;
            let provider = record
                .provider_mut()
                .ok_or_else(|| internal("write-mode record has no provider"))?;
            ensure_subarray_structure(
                provider,
                &partition,
                data_type,
                &fill_value,
                &ctx.dimensions,
            )?;

            let block = entry.target.extract_bytes(bytes, slab.shape(), element_size)?;
            let source = entry
                .source
                .as_subset()
                .ok_or_else(|| internal("write slabs have unit steps"))?;
            provider.write_slab("", &partition.in_file_variable, &source, &block)?;
            record.mark_dirty();
        }
        Ok(())
    }

    /// Read the normalised `slab` of a partitioned variable.
    ///
    /// Tiles never written, or whose subarray file is absent on the backing store, fill their
    /// region of the result with the variable's fill value.
    ///
    /// # Errors
    /// Returns a [`VariableError`] if a file operation fails.
    pub(crate) fn read_partitioned(
        &self,
        slab: &NormalisedSlab,
        ctx: &mut SubarrayContext<'_>,
    ) -> Result<Vec<u8>, VariableError> {
        let element_size = self.data_type.size();
        let Some(state) = self.partitioned() else {
            return Err(VariableError::WrongKind {
                name: self.name.clone(),
            });
        };
        let matrix = state.matrix();
        let mut out =
            ctx.file_manager
                .request_array(slab.shape(), self.data_type, Some(&self.fill_value));

        for entry in matrix.index(slab)? {
            let partition = matrix
                .partition(&entry.partition)
                .ok_or_else(|| internal("index entry outside the partition matrix"))?;
            let Some(uri) = &partition.file else {
                continue;
            };
            let projected = partition.num_elements() * element_size as u64;
            let record =
                ctx.file_manager
                    .request_file(uri, projected, AccessMode::Read, partition.format)?;
            if !record.exists() {
                continue;
            }
            let provider = record
                .provider()
                .ok_or_else(|| internal("existing record has no provider"))?;
            let bytes = if let Some(source) = entry.source.as_subset() {
                provider.read_slab("", &partition.in_file_variable, &source)?
            } else {
                let bounding = entry.source.bounding_subset();
                let slab_bytes =
                    provider.read_slab("", &partition.in_file_variable, &bounding)?;
                gather_strided(
                    &slab_bytes,
                    bounding.shape(),
                    entry.source.steps(),
                    entry.source.shape(),
                    element_size,
                )
            };
            entry
                .target
                .inject_bytes(&bytes, &mut out, slab.shape(), element_size)?;
        }
        Ok(out)
    }
}

/// Build the subarray file's internal structure if it is not already present: the tile's
/// dimensions, their coordinate slabs subset from the master's dimension variables, and the
/// field variable.
fn ensure_subarray_structure(
    provider: &mut dyn StructuredFileProvider,
    partition: &Partition,
    data_type: DataType,
    fill_value: &crate::data_type::FillValue,
    dimensions: &[SubarrayDimension],
) -> Result<(), VariableError> {
    let existing = provider.list_dimensions("")?;
    for (d, dimension) in dimensions.iter().enumerate() {
        if !existing.contains(&dimension.name) {
            provider.create_dimension("", &dimension.name, Some(partition.shape[d]))?;
        }
        if let Some((coord_type, coords)) = &dimension.coordinates {
            if !provider.variable_exists("", &dimension.name) {
                provider.create_variable(
                    "",
                    &dimension.name,
                    *coord_type,
                    std::slice::from_ref(&dimension.name),
                    None,
                )?;
                let full_len = (coords.len() / coord_type.size()) as u64;
                let (start, end) = partition.location[d];
                let subset = ArraySubset::new_with_ranges(&[start..end]);
                let slab = subset.extract_bytes(coords, &[full_len], coord_type.size())?;
                provider.write_slab(
                    "",
                    &dimension.name,
                    &ArraySubset::new_with_ranges(&[0..end - start]),
                    &slab,
                )?;
            }
        }
    }
    if !provider.variable_exists("", &partition.in_file_variable) {
        let names: Vec<String> = dimensions.iter().map(|d| d.name.clone()).collect();
        provider.create_variable(
            "",
            &partition.in_file_variable,
            data_type,
            &names,
            Some(fill_value),
        )?;
    }
    Ok(())
}

/// Gather the stepped elements of a C-order `bytes` array with `bounding_shape` into a dense
/// C-order output with `out_shape`, stepping `steps` from the array origin.
pub(crate) fn gather_strided(
    bytes: &[u8],
    bounding_shape: &[u64],
    steps: &[u64],
    out_shape: &[u64],
    element_size: usize,
) -> Vec<u8> {
    let strides = c_order_strides(bounding_shape);
    let num_elements = usize::try_from(out_shape.iter().product::<u64>()).unwrap_or(0);
    let mut out = Vec::with_capacity(num_elements * element_size);
    for indices in &ArraySubset::new_with_shape(out_shape.to_vec()).indices() {
        let offset: u64 = itertools::izip!(&indices, steps, &strides)
            .map(|(i, step, stride)| i * step * stride)
            .sum();
        let offset = usize::try_from(offset).unwrap_or(usize::MAX) * element_size;
        out.extend_from_slice(&bytes[offset..offset + element_size]);
    }
    out
}

fn internal(message: &str) -> VariableError {
    VariableError::Internal(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_strided_selects_lattice() {
        // 1-D array 0..10, step 3 from origin: 0, 3, 6, 9.
        let bytes: Vec<u8> = (0..10u8).collect();
        let out = gather_strided(&bytes, &[10], &[3], &[4], 1);
        assert_eq!(out, vec![0, 3, 6, 9]);

        // 2-D: 4x4 of u8, steps (2, 2) select the corners of each 2x2 block.
        let bytes: Vec<u8> = (0..16u8).collect();
        let out = gather_strided(&bytes, &[4, 4], &[2, 2], &[2, 2], 1);
        assert_eq!(out, vec![0, 2, 8, 10]);
    }
}
