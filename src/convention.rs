//! The aggregation convention.
//!
//! The master file records how each partitioned variable is sharded across
//! subarray files. Two convention versions are supported: [v0.4](v0_4) stores
//! the partition table as stringified JSON in variable attributes; [v0.5](v0_5)
//! stores the same information in structured auxiliary variables and
//! sub-groups. The field variable is a scalar in the master under both.
//!
//! On read the convention is detected from the master's root attributes and
//! every partitioned variable is materialised, with its partition matrix
//! populated, before any user slice is issued. No subarray file is opened
//! during parse.

mod v0_4;
mod v0_5;

use thiserror::Error;

use crate::array_subset::ArraySubset;
use crate::data_type::{AttrValue, DataType, FillValue};
use crate::dimension::Dimension;
use crate::group::{Group, GroupError};
use crate::partition::{PartitionMatrix, PartitioningError};
use crate::structured::{ProviderError, StructuredFileProvider};
use crate::uri::{Uri, UriError};
use crate::variable::{Variable, VariableKind};

/// The attribute carrying the convention tag on the master's root group.
pub const CONVENTIONS_ATTRIBUTE: &str = "Conventions";

/// The attribute marking a master variable as partitioned.
pub const CFA_ARRAY_ATTRIBUTE: &str = "cfa_array";

/// The attribute carrying the partitioned variable's dimension names.
pub const CFA_DIMENSIONS_ATTRIBUTE: &str = "cfa_dimensions";

/// The attribute carrying the partitioned variable's logical shape.
pub const CFA_ARRAY_SHAPE_ATTRIBUTE: &str = "cfa_array_shape";

/// The attribute carrying the v0.4 partition table.
pub const CFA_PARTITIONING_ATTRIBUTE: &str = "cfa_partitioning";

/// The attribute carrying a variable's fill value.
pub const FILL_VALUE_ATTRIBUTE: &str = "_FillValue";

/// A supported version of the aggregation convention.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ConventionVersion {
    /// Convention v0.4: stringified partition table in attributes.
    V0_4,
    /// Convention v0.5: structured auxiliary variables and sub-groups.
    V0_5,
}

impl ConventionVersion {
    /// The convention tag written to the master's root attributes.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::V0_4 => "CFA-0.4",
            Self::V0_5 => "CFA-0.5",
        }
    }

    /// The bare version number.
    #[must_use]
    pub const fn number(&self) -> &'static str {
        match self {
            Self::V0_4 => "0.4",
            Self::V0_5 => "0.5",
        }
    }

    /// Parse a version number (`"0.4"` or `"0.5"`).
    ///
    /// # Errors
    /// Returns [`ConventionError::UnknownVersion`] for any other string.
    pub fn from_number(number: &str) -> Result<Self, ConventionError> {
        match number {
            "0.4" => Ok(Self::V0_4),
            "0.5" => Ok(Self::V0_5),
            _ => Err(ConventionError::UnknownVersion(number.to_string())),
        }
    }
}

impl core::fmt::Display for ConventionVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Detect the convention version from a master's root attributes.
///
/// # Errors
/// Returns a [`ConventionError`] if the attribute lookup fails.
pub fn detect(
    provider: &dyn StructuredFileProvider,
) -> Result<Option<ConventionVersion>, ConventionError> {
    let Some(value) = provider.get_attribute("", None, CONVENTIONS_ATTRIBUTE)? else {
        return Ok(None);
    };
    let Some(tags) = value.as_str() else {
        return Ok(None);
    };
    if tags.split_whitespace().any(|t| t == ConventionVersion::V0_5.tag()) {
        Ok(Some(ConventionVersion::V0_5))
    } else if tags.split_whitespace().any(|t| t == ConventionVersion::V0_4.tag()) {
        Ok(Some(ConventionVersion::V0_4))
    } else {
        Ok(None)
    }
}

/// Write the whole group tree and its partition metadata into the master.
///
/// With no `version` the tree is written without an aggregation convention; a partitioned
/// variable is then an error.
///
/// # Errors
/// Returns a [`ConventionError`] if a provider operation or the metadata encoding fails.
pub fn write_master(
    provider: &mut dyn StructuredFileProvider,
    version: Option<ConventionVersion>,
    root: &Group,
) -> Result<(), ConventionError> {
    write_group(provider, version, root, "")?;
    if let Some(version) = version {
        provider.set_attribute(
            "",
            None,
            CONVENTIONS_ATTRIBUTE,
            AttrValue::from(version.tag()),
        )?;
    }
    Ok(())
}

fn write_group(
    provider: &mut dyn StructuredFileProvider,
    version: Option<ConventionVersion>,
    group: &Group,
    path: &str,
) -> Result<(), ConventionError> {
    for (name, value) in group.attributes() {
        provider.set_attribute(path, None, name, value.clone())?;
    }
    for (name, dimension) in group.dimensions() {
        provider.create_dimension(path, name, dimension.declared_length())?;
    }
    for (name, variable) in group.variables() {
        match variable.kind() {
            VariableKind::Classical { data, shape } => {
                provider.create_variable(
                    path,
                    name,
                    variable.data_type(),
                    variable.dimensions(),
                    Some(variable.fill_value()),
                )?;
                if !shape.iter().any(|s| *s == 0) {
                    provider.write_slab(
                        path,
                        name,
                        &ArraySubset::new_with_shape(shape.clone()),
                        data,
                    )?;
                }
                write_variable_attributes(provider, path, name, variable)?;
                // Dimension attributes ride on the dimension variable.
                if let Some(dimension) = group.dimension(name) {
                    for (attr, value) in dimension.attributes() {
                        provider.set_attribute(path, Some(name), attr, value.clone())?;
                    }
                }
            }
            VariableKind::Partitioned(state) => {
                provider.create_variable(
                    path,
                    name,
                    variable.data_type(),
                    &[],
                    Some(variable.fill_value()),
                )?;
                write_variable_attributes(provider, path, name, variable)?;
                match version {
                    Some(ConventionVersion::V0_4) => {
                        v0_4::write_variable(provider, path, name, variable, state.matrix())?;
                    }
                    Some(ConventionVersion::V0_5) => {
                        v0_5::write_variable(provider, path, name, variable, state.matrix())?;
                    }
                    None => {
                        return Err(ConventionError::Invalid(format!(
                            "partitioned variable {name} in a master with no aggregation convention"
                        )));
                    }
                }
            }
        }
    }
    for (name, child) in group.groups() {
        let child_path = if path.is_empty() {
            name.clone()
        } else {
            format!("{path}/{name}")
        };
        provider.create_group(&child_path)?;
        write_group(provider, version, child, &child_path)?;
    }
    Ok(())
}

fn write_variable_attributes(
    provider: &mut dyn StructuredFileProvider,
    path: &str,
    name: &str,
    variable: &Variable,
) -> Result<(), ConventionError> {
    provider.set_attribute(
        path,
        Some(name),
        FILL_VALUE_ATTRIBUTE,
        fill_value_to_attr(variable.data_type(), variable.fill_value()),
    )?;
    for (attr, value) in variable.attributes() {
        provider.set_attribute(path, Some(name), attr, value.clone())?;
    }
    Ok(())
}

/// Parse a master into its group tree, materialising partitioned variables with their partition
/// matrices populated. No subarray file is opened.
///
/// # Errors
/// Returns a [`ConventionError`] if the master's metadata is missing or inconsistent.
pub fn parse_master(
    provider: &dyn StructuredFileProvider,
    version: ConventionVersion,
) -> Result<Group, ConventionError> {
    let mut root = Group::new("root");
    parse_group(provider, version, &mut root, "")?;
    Ok(root)
}

fn parse_group(
    provider: &dyn StructuredFileProvider,
    version: ConventionVersion,
    group: &mut Group,
    path: &str,
) -> Result<(), ConventionError> {
    for name in provider.list_attributes(path, None)? {
        if path.is_empty() && name == CONVENTIONS_ATTRIBUTE {
            continue;
        }
        if let Some(value) = provider.get_attribute(path, None, &name)? {
            group.attributes_mut().insert(name, value);
        }
    }
    for name in provider.list_dimensions(path)? {
        let mut dimension = if provider.dimension_is_unlimited(path, &name)? {
            let mut dimension = Dimension::new(&name, None);
            dimension.grow_to(provider.dimension_length(path, &name)?);
            dimension
        } else {
            Dimension::new(&name, Some(provider.dimension_length(path, &name)?))
        };
        dimension.reclassify_axis();
        group.add_dimension(dimension)?;
    }
    for name in provider.list_variables(path)? {
        let is_partitioned = provider
            .get_attribute(path, Some(&name), CFA_ARRAY_ATTRIBUTE)?
            .is_some();
        let data_type = provider.variable_data_type(path, &name)?;
        let fill_value = provider
            .get_attribute(path, Some(&name), FILL_VALUE_ATTRIBUTE)?
            .and_then(|attr| attr_to_fill_value(data_type, &attr));
        let mut variable = if is_partitioned {
            let (dimensions, matrix) = match version {
                ConventionVersion::V0_4 => {
                    v0_4::parse_variable(provider, path, &name)?
                }
                ConventionVersion::V0_5 => {
                    v0_5::parse_variable(provider, path, &name)?
                }
            };
            matrix.validate()?;
            Variable::new_partitioned(&name, data_type, dimensions, matrix, fill_value)
        } else {
            let dimensions = provider.variable_dimensions(path, &name)?;
            let shape = provider.variable_shape(path, &name)?;
            let data = provider.read_slab(path, &name, &ArraySubset::new_with_shape(shape.clone()))?;
            let mut variable =
                Variable::new_classical(&name, data_type, dimensions, shape.clone(), fill_value);
            variable.set_classical_data(data, shape);
            variable
        };
        for attr in provider.list_attributes(path, Some(&name))? {
            if is_reserved_attribute(&attr) {
                continue;
            }
            if let Some(value) = provider.get_attribute(path, Some(&name), &attr)? {
                variable.set_attribute(&attr, value);
            }
        }
        group.add_variable(variable)?;
    }
    for name in provider.list_groups(path)? {
        if version == ConventionVersion::V0_5 && name == v0_5::CFA_GROUP {
            continue;
        }
        let child_path = if path.is_empty() {
            name.clone()
        } else {
            format!("{path}/{name}")
        };
        let child = group.add_group(&name)?;
        parse_group(provider, version, child, &child_path)?;
    }
    Ok(())
}

fn is_reserved_attribute(name: &str) -> bool {
    name == FILL_VALUE_ATTRIBUTE || name.starts_with("cfa_")
}

/// Encode a fill value as an attribute value for its data type.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
pub fn fill_value_to_attr(data_type: DataType, fill_value: &FillValue) -> AttrValue {
    let bytes = fill_value.as_ne_bytes();
    fn arr<const N: usize>(bytes: &[u8]) -> Option<[u8; N]> {
        bytes.try_into().ok()
    }
    let attr = match data_type {
        DataType::Int8 => arr(bytes).map(|b| AttrValue::Int(i64::from(i8::from_ne_bytes(b)))),
        DataType::UInt8 => arr(bytes).map(|b| AttrValue::Int(i64::from(u8::from_ne_bytes(b)))),
        DataType::Int16 => arr(bytes).map(|b| AttrValue::Int(i64::from(i16::from_ne_bytes(b)))),
        DataType::UInt16 => arr(bytes).map(|b| AttrValue::Int(i64::from(u16::from_ne_bytes(b)))),
        DataType::Int32 => arr(bytes).map(|b| AttrValue::Int(i64::from(i32::from_ne_bytes(b)))),
        DataType::UInt32 => arr(bytes).map(|b| AttrValue::Int(i64::from(u32::from_ne_bytes(b)))),
        DataType::Int64 => arr(bytes).map(|b| AttrValue::Int(i64::from_ne_bytes(b))),
        DataType::UInt64 => arr(bytes).map(|b| AttrValue::Int(u64::from_ne_bytes(b) as i64)),
        DataType::Float32 => arr(bytes).map(|b| AttrValue::Float(f64::from(f32::from_ne_bytes(b)))),
        DataType::Float64 => arr(bytes).map(|b| AttrValue::Float(f64::from_ne_bytes(b))),
    };
    attr.unwrap_or(AttrValue::Int(0))
}

/// Decode a fill value from its attribute encoding.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn attr_to_fill_value(data_type: DataType, attr: &AttrValue) -> Option<FillValue> {
    match data_type {
        DataType::Int8 => attr.as_i64().map(|v| FillValue::from(v as i8)),
        DataType::UInt8 => attr.as_i64().map(|v| FillValue::from(v as u8)),
        DataType::Int16 => attr.as_i64().map(|v| FillValue::from(v as i16)),
        DataType::UInt16 => attr.as_i64().map(|v| FillValue::from(v as u16)),
        DataType::Int32 => attr.as_i64().map(|v| FillValue::from(v as i32)),
        DataType::UInt32 => attr.as_i64().map(|v| FillValue::from(v as u32)),
        DataType::Int64 => attr.as_i64().map(FillValue::from),
        DataType::UInt64 => attr.as_i64().map(|v| FillValue::from(v as u64)),
        DataType::Float32 => attr.as_f64().map(|v| FillValue::from(v as f32)),
        DataType::Float64 => attr.as_f64().map(FillValue::from),
    }
}

/// A convention serialisation or parse error.
#[derive(Debug, Error)]
pub enum ConventionError {
    /// An unknown convention version number.
    #[error("unknown convention version {0}")]
    UnknownVersion(String),
    /// A required metadata item is missing.
    #[error("master is missing {0}")]
    Missing(String),
    /// Metadata is present but inconsistent.
    #[error("invalid master metadata: {0}")]
    Invalid(String),
    /// An underlying provider error.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// A group namespace error while materialising the tree.
    #[error(transparent)]
    Group(#[from] GroupError),
    /// An invalid recorded URI.
    #[error(transparent)]
    Uri(#[from] UriError),
    /// A partition matrix could not be reconstructed.
    #[error(transparent)]
    Partitioning(#[from] PartitioningError),
}

impl From<serde_json::Error> for ConventionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Invalid(err.to_string())
    }
}

/// Apply a recorded partition onto a freshly reconstructed matrix, checking that the recorded
/// geometry matches.
pub(crate) fn apply_partition_record(
    matrix: &mut PartitionMatrix,
    index: &[u64],
    location: &[(u64, u64)],
    shape: &[u64],
    file: &str,
    format: crate::structured::FileFormat,
    in_variable: &str,
) -> Result<(), ConventionError> {
    let partition = matrix.partition_mut(index).ok_or_else(|| {
        ConventionError::Invalid(format!("recorded partition {index:?} is outside the matrix"))
    })?;
    if partition.location != location || partition.shape != shape {
        return Err(ConventionError::Invalid(format!(
            "recorded partition {index:?} does not match the reconstructed tiling"
        )));
    }
    partition.file = Some(Uri::new(file)?);
    partition.format = format;
    partition.in_file_variable = in_variable.to_string();
    Ok(())
}
