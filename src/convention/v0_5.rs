//! Convention v0.5: structured auxiliary variables and sub-groups.
//!
//! Each partitioned variable `v` in a group gets a sub-group `cfa/v` holding
//! its partition metadata as plain integer arrays (`array_shape`,
//! `subarray_shape`, `pmshape`, and per written partition `index`, `location`,
//! `shape`) with the string-valued columns (`files`, `formats`,
//! `in_variables`) as attribute arrays on the sub-group. The field variable
//! remains a scalar in the master. This encoding requires a hierarchical
//! master and is rejected for the classic format family at open time.

use crate::data_type::{elements_from_bytes, elements_to_bytes, AttrValue, DataType};
use crate::array_subset::ArraySubset;
use crate::partition::PartitionMatrix;
use crate::structured::{FileFormat, StructuredFileProvider};
use crate::variable::Variable;

use super::{
    apply_partition_record, v0_4, ConventionError, CFA_ARRAY_ATTRIBUTE, CFA_DIMENSIONS_ATTRIBUTE,
};

/// The sub-group holding partition metadata within each group.
pub(crate) const CFA_GROUP: &str = "cfa";

const NDIM_DIMENSION: &str = "ndim";
const NPART_DIMENSION: &str = "npart";
const BOUNDS_DIMENSION: &str = "bnd";

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

    let base = aux_group_path(path, name);
    provider.create_group(&base)?;

    let ndim = matrix.dimensionality() as u64;
    let written: Vec<_> = matrix.written_partitions().collect();
    let npart = written.len() as u64;
    provider.create_dimension(&base, NDIM_DIMENSION, Some(ndim))?;
    provider.create_dimension(&base, NPART_DIMENSION, Some(npart))?;
    provider.create_dimension(&base, BOUNDS_DIMENSION, Some(2))?;

    write_i64_array(
        provider,
        &base,
        "array_shape",
        &[NDIM_DIMENSION.to_string()],
        &to_i64(matrix.array_shape()),
    )?;
    write_i64_array(
        provider,
        &base,
        "subarray_shape",
        &[NDIM_DIMENSION.to_string()],
        &to_i64(matrix.tile_shape()),
    )?;
    write_i64_array(
        provider,
        &base,
        "pmshape",
        &[NDIM_DIMENSION.to_string()],
        &to_i64(matrix.grid_shape()),
    )?;

    let mut index = Vec::with_capacity(written.len() * matrix.dimensionality());
    let mut location = Vec::with_capacity(written.len() * matrix.dimensionality() * 2);
    let mut shape = Vec::with_capacity(written.len() * matrix.dimensionality());
    let mut files = Vec::with_capacity(written.len());
    let mut formats = Vec::with_capacity(written.len());
    let mut in_variables = Vec::with_capacity(written.len());
    for partition in &written {
        index.extend(to_i64(&partition.index));
        for &(start, end) in &partition.location {
            location.push(i64::try_from(start).unwrap_or(i64::MAX));
            location.push(i64::try_from(end).unwrap_or(i64::MAX));
        }
        shape.extend(to_i64(&partition.shape));
        files.push(
            partition
                .file
                .as_ref()
                .map(|uri| uri.as_str().to_string())
                .unwrap_or_default(),
        );
        formats.push(partition.format.name().to_string());
        in_variables.push(partition.in_file_variable.clone());
    }
    let part_dims = [NPART_DIMENSION.to_string(), NDIM_DIMENSION.to_string()];
    write_i64_array(provider, &base, "index", &part_dims, &index)?;
    write_i64_array(
        provider,
        &base,
        "location",
        &[
            NPART_DIMENSION.to_string(),
            NDIM_DIMENSION.to_string(),
            BOUNDS_DIMENSION.to_string(),
        ],
        &location,
    )?;
    write_i64_array(provider, &base, "shape", &part_dims, &shape)?;

    provider.set_attribute(&base, None, "files", AttrValue::StrArray(files))?;
    provider.set_attribute(&base, None, "formats", AttrValue::StrArray(formats))?;
    provider.set_attribute(&base, None, "in_variables", AttrValue::StrArray(in_variables))?;
    Ok(())
}

pub(crate) fn parse_variable(
    provider: &dyn StructuredFileProvider,
    path: &str,
    name: &str,
) -> Result<(Vec<String>, PartitionMatrix), ConventionError> {
    let dimensions = v0_4::dimensions_attr(provider, path, name)?;
    let base = aux_group_path(path, name);

    let array_shape = read_u64_array(provider, &base, "array_shape")?;
    let subarray_shape = read_u64_array(provider, &base, "subarray_shape")?;
    let pmshape = read_u64_array(provider, &base, "pmshape")?;
    let index = read_u64_array(provider, &base, "index")?;
    let location = read_u64_array(provider, &base, "location")?;
    let shape = read_u64_array(provider, &base, "shape")?;
    let files = read_str_array(provider, &base, "files")?;
    let formats = read_str_array(provider, &base, "formats")?;
    let in_variables = read_str_array(provider, &base, "in_variables")?;

    let mut matrix =
        PartitionMatrix::new_regular(array_shape, subarray_shape, provider.format(), name)?;
    if matrix.grid_shape() != pmshape.as_slice() {
        return Err(ConventionError::Invalid(format!(
            "recorded pmshape {:?} does not match the reconstructed grid {:?}",
            pmshape,
            matrix.grid_shape()
        )));
    }

    let ndim = matrix.dimensionality();
    let npart = files.len();
    if index.len() != npart * ndim
        || shape.len() != npart * ndim
        || location.len() != npart * ndim * 2
        || formats.len() != npart
        || in_variables.len() != npart
    {
        return Err(ConventionError::Invalid(
            "partition metadata columns disagree on the partition count".to_string(),
        ));
    }
    for k in 0..npart {
        let row_index = &index[k * ndim..(k + 1) * ndim];
        let row_shape = &shape[k * ndim..(k + 1) * ndim];
        let row_location: Vec<(u64, u64)> = (0..ndim)
            .map(|d| {
                let at = k * ndim * 2 + d * 2;
                (location[at], location[at + 1])
            })
            .collect();
        let format = FileFormat::from_name(&formats[k]).ok_or_else(|| {
            ConventionError::Invalid(format!("unknown subarray format {}", formats[k]))
        })?;
        apply_partition_record(
            &mut matrix,
            row_index,
            &row_location,
            row_shape,
            &files[k],
            format,
            &in_variables[k],
        )?;
    }
    Ok((dimensions, matrix))
}

fn aux_group_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        format!("{CFA_GROUP}/{name}")
    } else {
        format!("{path}/{CFA_GROUP}/{name}")
    }
}

fn to_i64(values: &[u64]) -> Vec<i64> {
    values
        .iter()
        .map(|&v| i64::try_from(v).unwrap_or(i64::MAX))
        .collect()
}

fn write_i64_array(
    provider: &mut dyn StructuredFileProvider,
    base: &str,
    name: &str,
    dimensions: &[String],
    values: &[i64],
) -> Result<(), ConventionError> {
    provider.create_variable(base, name, DataType::Int64, dimensions, None)?;
    let shape = provider.variable_shape(base, name)?;
    if !shape.iter().any(|s| *s == 0) {
        provider.write_slab(
            base,
            name,
            &ArraySubset::new_with_shape(shape),
            &elements_to_bytes(values),
        )?;
    }
    Ok(())
}

fn read_u64_array(
    provider: &dyn StructuredFileProvider,
    base: &str,
    name: &str,
) -> Result<Vec<u64>, ConventionError> {
    let shape = provider.variable_shape(base, name)?;
    let bytes = provider.read_slab(base, name, &ArraySubset::new_with_shape(shape))?;
    let values = elements_from_bytes::<i64>(&bytes)
        .map_err(|err| ConventionError::Invalid(err.to_string()))?;
    values
        .into_iter()
        .map(|v| {
            u64::try_from(v)
                .map_err(|_| ConventionError::Invalid(format!("negative extent {v} in {name}")))
        })
        .collect()
}

fn read_str_array(
    provider: &dyn StructuredFileProvider,
    base: &str,
    name: &str,
) -> Result<Vec<String>, ConventionError> {
    match provider.get_attribute(base, None, name)? {
        Some(AttrValue::StrArray(values)) => Ok(values),
        // An empty array deserialises as the first untagged array variant.
        Some(AttrValue::IntArray(values)) if values.is_empty() => Ok(Vec::new()),
        Some(_) => Err(ConventionError::Invalid(format!(
            "{name} is not a string array"
        ))),
        None => Err(ConventionError::Missing(name.to_string())),
    }
}
