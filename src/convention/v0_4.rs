//! Convention v0.4: the partition table as stringified JSON in attributes.
//!
//! A partitioned variable is stored in the master as a scalar whose
//! attributes carry `cfa_array = 1`, `cfa_dimensions` (space separated),
//! `cfa_array_shape`, and `cfa_partitioning`: a JSON document enumerating the
//! grid shape, the nominal subarray shape, and every written partition.

use serde::{Deserialize, Serialize};

use crate::data_type::AttrValue;
use crate::partition::PartitionMatrix;
use crate::structured::{FileFormat, StructuredFileProvider};
use crate::variable::Variable;

use super::{
    apply_partition_record, ConventionError, CFA_ARRAY_ATTRIBUTE, CFA_ARRAY_SHAPE_ATTRIBUTE,
    CFA_DIMENSIONS_ATTRIBUTE, CFA_PARTITIONING_ATTRIBUTE,
};

/// One written partition in the `cfa_partitioning` document.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub(crate) struct PartitionRecord {
    pub index: Vec<u64>,
    pub location: Vec<(u64, u64)>,
    pub shape: Vec<u64>,
    pub file: String,
    pub format: FileFormat,
    pub in_variable: String,
}

/// The `cfa_partitioning` document.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub(crate) struct PartitioningRecord {
    pub pmshape: Vec<u64>,
    pub subarray_shape: Vec<u64>,
    pub partitions: Vec<PartitionRecord>,
}

pub(crate) fn write_variable(
    provider: &mut dyn StructuredFileProvider,
    path: &str,
    name: &str,
    variable: &Variable,
    matrix: &PartitionMatrix,
) -> Result<(), ConventionError> {
    provider.set_attribute(path, Some(name), CFA_ARRAY_ATTRIBUTE, AttrValue::Int(1))?;
    provider.set_attribute(
        path,
        Some(name),
        CFA_DIMENSIONS_ATTRIBUTE,
        AttrValue::from(variable.dimensions().join(" ")),
    )?;
    provider.set_attribute(
        path,
        Some(name),
        CFA_ARRAY_SHAPE_ATTRIBUTE,
        shape_attr(matrix.array_shape()),
    )?;

    let record = PartitioningRecord {
        pmshape: matrix.grid_shape().to_vec(),
        subarray_shape: matrix.tile_shape().to_vec(),
        partitions: matrix
            .written_partitions()
            .map(|partition| PartitionRecord {
                index: partition.index.clone(),
                location: partition.location.clone(),
                shape: partition.shape.clone(),
                file: partition
                    .file
                    .as_ref()
                    .map(|uri| uri.as_str().to_string())
                    .unwrap_or_default(),
                format: partition.format,
                in_variable: partition.in_file_variable.clone(),
            })
            .collect(),
    };
    provider.set_attribute(
        path,
        Some(name),
        CFA_PARTITIONING_ATTRIBUTE,
        AttrValue::from(serde_json::to_string(&record)?),
    )?;
    Ok(())
}

pub(crate) fn parse_variable(
    provider: &dyn StructuredFileProvider,
    path: &str,
    name: &str,
) -> Result<(Vec<String>, PartitionMatrix), ConventionError> {
    let dimensions = dimensions_attr(provider, path, name)?;
    let array_shape = array_shape_attr(provider, path, name)?;

    let partitioning = provider
        .get_attribute(path, Some(name), CFA_PARTITIONING_ATTRIBUTE)?
        .ok_or_else(|| ConventionError::Missing(CFA_PARTITIONING_ATTRIBUTE.to_string()))?;
    let partitioning = partitioning
        .as_str()
        .ok_or_else(|| ConventionError::Invalid(format!("{CFA_PARTITIONING_ATTRIBUTE} is not a string")))?;
    let record: PartitioningRecord = serde_json::from_str(partitioning)?;

    let mut matrix = PartitionMatrix::new_regular(
        array_shape,
        record.subarray_shape,
        provider.format(),
        name,
    )?;
    if matrix.grid_shape() != record.pmshape.as_slice() {
        return Err(ConventionError::Invalid(format!(
            "recorded pmshape {:?} does not match the reconstructed grid {:?}",
            record.pmshape,
            matrix.grid_shape()
        )));
    }
    for partition in &record.partitions {
        apply_partition_record(
            &mut matrix,
            &partition.index,
            &partition.location,
            &partition.shape,
            &partition.file,
            partition.format,
            &partition.in_variable,
        )?;
    }
    Ok((dimensions, matrix))
}

pub(crate) fn shape_attr(shape: &[u64]) -> AttrValue {
    AttrValue::IntArray(
        shape
            .iter()
            .map(|&s| i64::try_from(s).unwrap_or(i64::MAX))
            .collect(),
    )
}

pub(crate) fn dimensions_attr(
    provider: &dyn StructuredFileProvider,
    path: &str,
    name: &str,
) -> Result<Vec<String>, ConventionError> {
    let dimensions = provider
        .get_attribute(path, Some(name), CFA_DIMENSIONS_ATTRIBUTE)?
        .ok_or_else(|| ConventionError::Missing(CFA_DIMENSIONS_ATTRIBUTE.to_string()))?;
    let dimensions = dimensions
        .as_str()
        .ok_or_else(|| ConventionError::Invalid(format!("{CFA_DIMENSIONS_ATTRIBUTE} is not a string")))?;
    Ok(dimensions.split_whitespace().map(str::to_string).collect())
}

pub(crate) fn array_shape_attr(
    provider: &dyn StructuredFileProvider,
    path: &str,
    name: &str,
) -> Result<Vec<u64>, ConventionError> {
    let shape = provider
        .get_attribute(path, Some(name), CFA_ARRAY_SHAPE_ATTRIBUTE)?
        .ok_or_else(|| ConventionError::Missing(CFA_ARRAY_SHAPE_ATTRIBUTE.to_string()))?;
    let shape = shape.as_i64_array().ok_or_else(|| {
        ConventionError::Invalid(format!("{CFA_ARRAY_SHAPE_ATTRIBUTE} is not an integer array"))
    })?;
    shape
        .iter()
        .map(|&s| {
            u64::try_from(s).map_err(|_| {
                ConventionError::Invalid(format!("negative extent {s} in {CFA_ARRAY_SHAPE_ATTRIBUTE}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitioning_record_json() {
        let record = PartitioningRecord {
            pmshape: vec![2, 2],
            subarray_shape: vec![2, 2],
            partitions: vec![PartitionRecord {
                index: vec![0, 1],
                location: vec![(0, 2), (2, 4)],
                shape: vec![2, 2],
                file: "/data/master/t.0.1.nc".to_string(),
                format: FileFormat::Hdf5,
                in_variable: "t".to_string(),
            }],
        };
        let json = serde_json::to_string(&record).unwrap();
        let parsed: PartitioningRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
