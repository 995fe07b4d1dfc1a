//! Element data types, fill values, and attribute values.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The element data type of a variable.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// `int8`
    Int8,
    /// `uint8`
    UInt8,
    /// `int16`
    Int16,
    /// `uint16`
    UInt16,
    /// `int32`
    Int32,
    /// `uint32`
    UInt32,
    /// `int64`
    Int64,
    /// `uint64`
    UInt64,
    /// `float32`
    Float32,
    /// `float64`
    Float64,
}

impl DataType {
    /// The size in bytes of an element of this data type.
    #[must_use]
    pub const fn size(&self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// The name of the data type.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::UInt8 => "uint8",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// Parse a data type from its name.
    ///
    /// # Errors
    /// Returns [`UnknownDataTypeError`] if `name` is not a recognised data type name.
    pub fn from_name(name: &str) -> Result<Self, UnknownDataTypeError> {
        match name {
            "int8" => Ok(Self::Int8),
            "uint8" => Ok(Self::UInt8),
            "int16" => Ok(Self::Int16),
            "uint16" => Ok(Self::UInt16),
            "int32" => Ok(Self::Int32),
            "uint32" => Ok(Self::UInt32),
            "int64" => Ok(Self::Int64),
            "uint64" => Ok(Self::UInt64),
            "float32" => Ok(Self::Float32),
            "float64" => Ok(Self::Float64),
            _ => Err(UnknownDataTypeError(name.to_string())),
        }
    }

    /// The default fill value of the data type.
    ///
    /// These are the sentinel values conventionally used by the classic array format family.
    #[must_use]
    pub fn default_fill_value(&self) -> FillValue {
        match self {
            Self::Int8 => FillValue::from(-127i8),
            Self::UInt8 => FillValue::from(255u8),
            Self::Int16 => FillValue::from(-32767i16),
            Self::UInt16 => FillValue::from(65535u16),
            Self::Int32 => FillValue::from(-2_147_483_647i32),
            Self::UInt32 => FillValue::from(4_294_967_295u32),
            Self::Int64 => FillValue::from(-9_223_372_036_854_775_806i64),
            Self::UInt64 => FillValue::from(18_446_744_073_709_551_614u64),
            Self::Float32 => FillValue::from(9.969_209_968_386_869e36f32),
            Self::Float64 => FillValue::from(9.969_209_968_386_869e36f64),
        }
    }
}

impl core::fmt::Display for DataType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// An unknown data type name.
#[derive(Clone, Debug, Error)]
#[error("unknown data type {0}")]
pub struct UnknownDataTypeError(String);

/// The fill value of a variable.
///
/// Provides an element value for regions of a partitioned variable that have never been written.
/// Held as the native-endian byte representation of the element.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct FillValue(Vec<u8>);

impl core::fmt::Display for FillValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

macro_rules! fill_value_from {
    ( $t:ty ) => {
        impl From<$t> for FillValue {
            fn from(value: $t) -> Self {
                FillValue(value.to_ne_bytes().to_vec())
            }
        }
    };
}

fill_value_from!(u8);
fill_value_from!(u16);
fill_value_from!(u32);
fill_value_from!(u64);
fill_value_from!(i8);
fill_value_from!(i16);
fill_value_from!(i32);
fill_value_from!(i64);
fill_value_from!(f32);
fill_value_from!(f64);

impl From<Vec<u8>> for FillValue {
    fn from(value: Vec<u8>) -> Self {
        FillValue(value)
    }
}

impl FillValue {
    /// Create a new fill value composed of `bytes`.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> FillValue {
        FillValue(bytes)
    }

    /// Returns the size in bytes of the fill value.
    #[must_use]
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// Return the byte representation of the fill value.
    #[must_use]
    pub fn as_ne_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns true if `bytes` is entirely the fill value repeated.
    #[must_use]
    pub fn equals_all(&self, bytes: &[u8]) -> bool {
        !self.0.is_empty()
            && bytes.len() % self.0.len() == 0
            && bytes.chunks_exact(self.0.len()).all(|c| c == self.0)
    }
}

/// An element type with a static [`DataType`].
///
/// Implemented for the plain numeric types; permits typed views over the byte-level variable I/O.
pub trait Element: bytemuck::Pod {
    /// The data type of the element.
    const DATA_TYPE: DataType;
}

macro_rules! impl_element {
    ( $t:ty, $dt:expr ) => {
        impl Element for $t {
            const DATA_TYPE: DataType = $dt;
        }
    };
}

impl_element!(i8, DataType::Int8);
impl_element!(u8, DataType::UInt8);
impl_element!(i16, DataType::Int16);
impl_element!(u16, DataType::UInt16);
impl_element!(i32, DataType::Int32);
impl_element!(u32, DataType::UInt32);
impl_element!(i64, DataType::Int64);
impl_element!(u64, DataType::UInt64);
impl_element!(f32, DataType::Float32);
impl_element!(f64, DataType::Float64);

/// Convert a slice of elements to its byte representation.
#[must_use]
pub fn elements_to_bytes<T: Element>(elements: &[T]) -> Vec<u8> {
    bytemuck::cast_slice(elements).to_vec()
}

/// Convert bytes to a vector of elements. The bytes are copied, so the input alignment does not
/// matter.
///
/// # Errors
/// Returns [`RawLengthError`] if the byte length is not a multiple of the element size.
pub fn elements_from_bytes<T: Element>(bytes: &[u8]) -> Result<Vec<T>, RawLengthError> {
    if bytes.len() % std::mem::size_of::<T>() != 0 {
        return Err(RawLengthError {
            byte_len: bytes.len(),
            element_size: std::mem::size_of::<T>(),
        });
    }
    Ok(bytemuck::allocation::pod_collect_to_vec(bytes))
}

/// A byte buffer whose length does not match the element size.
#[derive(Copy, Clone, Debug, Error)]
#[error("byte length {byte_len} is not a multiple of the element size {element_size}")]
pub struct RawLengthError {
    /// The byte length.
    pub byte_len: usize,
    /// The element size.
    pub element_size: usize,
}

/// An attribute value: a scalar or an array of scalars.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// A string.
    Str(String),
    /// A signed integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// An array of signed integers.
    IntArray(Vec<i64>),
    /// An array of floats.
    FloatArray(Vec<f64>),
    /// An array of strings.
    StrArray(Vec<String>),
}

impl AttrValue {
    /// The value as a string, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The value as a signed integer, if it is one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The value as a float, widening integers.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// The value as an integer array, if it is one.
    #[must_use]
    pub fn as_i64_array(&self) -> Option<&[i64]> {
        match self {
            Self::IntArray(a) => Some(a),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(value: Vec<i64>) -> Self {
        Self::IntArray(value)
    }
}

impl From<Vec<f64>> for AttrValue {
    fn from(value: Vec<f64>) -> Self {
        Self::FloatArray(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_names_round_trip() {
        for data_type in [
            DataType::Int8,
            DataType::UInt8,
            DataType::Int16,
            DataType::UInt16,
            DataType::Int32,
            DataType::UInt32,
            DataType::Int64,
            DataType::UInt64,
            DataType::Float32,
            DataType::Float64,
        ] {
            assert_eq!(DataType::from_name(data_type.name()).unwrap(), data_type);
            assert_eq!(data_type.default_fill_value().size(), data_type.size());
        }
        assert!(DataType::from_name("complex64").is_err());
    }

    #[test]
    fn fill_value_equals_all() {
        let fill = FillValue::from(7.5f32);
        let bytes = elements_to_bytes(&[7.5f32; 6]);
        assert!(fill.equals_all(&bytes));
        let bytes = elements_to_bytes(&[7.5f32, 7.5, 1.0]);
        assert!(!fill.equals_all(&bytes));
        assert!(!fill.equals_all(&bytes[..3]));
    }

    #[test]
    fn element_round_trip() {
        let elements = vec![1i32, -2, 3];
        let bytes = elements_to_bytes(&elements);
        assert_eq!(bytes.len(), 12);
        assert_eq!(elements_from_bytes::<i32>(&bytes).unwrap(), elements);
        assert!(elements_from_bytes::<i32>(&bytes[..5]).is_err());
    }

    #[test]
    fn attr_value_json() {
        let value = AttrValue::from("metres");
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, "\"metres\"");
        assert_eq!(serde_json::from_str::<AttrValue>(&json).unwrap(), value);

        let value = AttrValue::from(vec![4i64, 4]);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, "[4,4]");
        assert_eq!(serde_json::from_str::<AttrValue>(&json).unwrap(), value);
    }
}
