//! Array subsets.
//!
//! An [`ArraySubset`] is a unit-step rectangular region of an n-dimensional
//! array, represented by a start and a shape. Slice dispatch, slab copies, and
//! partition overlap computations are all built on it.

pub mod iterators;

use std::ops::Range;

use derive_more::{Display, From};
use itertools::izip;
use thiserror::Error;

use iterators::Indices;

/// The shape of an array or region.
pub type ArrayShape = Vec<u64>;

/// Indices of an element or tile in an array.
pub type ArrayIndices = Vec<u64>;

/// An array subset.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Default)]
#[display("start {start:?} shape {shape:?}")]
pub struct ArraySubset {
    /// The start of the array subset.
    start: ArrayIndices,
    /// The shape of the array subset.
    shape: ArrayShape,
}

impl ArraySubset {
    /// Create a new empty array subset.
    #[must_use]
    pub fn new_empty(dimensionality: usize) -> Self {
        Self {
            start: vec![0; dimensionality],
            shape: vec![0; dimensionality],
        }
    }

    /// Create a new array subset from a list of [`Range`]s.
    #[must_use]
    pub fn new_with_ranges(ranges: &[Range<u64>]) -> Self {
        let start = ranges.iter().map(|range| range.start).collect();
        let shape = ranges
            .iter()
            .map(|range| range.end.saturating_sub(range.start))
            .collect();
        Self { start, shape }
    }

    /// Create a new array subset spanning `shape` starting at the origin.
    #[must_use]
    pub fn new_with_shape(shape: ArrayShape) -> Self {
        Self {
            start: vec![0; shape.len()],
            shape,
        }
    }

    /// Create a new array subset.
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if the lengths of `start` and `shape` do not match.
    pub fn new_with_start_shape(
        start: ArrayIndices,
        shape: ArrayShape,
    ) -> Result<Self, IncompatibleDimensionalityError> {
        if start.len() == shape.len() {
            Ok(Self { start, shape })
        } else {
            Err(IncompatibleDimensionalityError::new(
                start.len(),
                shape.len(),
            ))
        }
    }

    /// Bound the array subset to the domain within `end` (exclusive).
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if `end` does not match the array subset dimensionality.
    pub fn bound(&self, end: &[u64]) -> Result<Self, IncompatibleDimensionalityError> {
        if end.len() == self.dimensionality() {
            let ranges: Vec<Range<u64>> = izip!(&self.start, &self.shape, end)
                .map(|(&start, &size, &end)| start.min(end)..(start + size).min(end))
                .collect();
            Ok(Self::new_with_ranges(&ranges))
        } else {
            Err(IncompatibleDimensionalityError::new(
                end.len(),
                self.dimensionality(),
            ))
        }
    }

    /// Return the start of the array subset.
    #[must_use]
    pub fn start(&self) -> &[u64] {
        &self.start
    }

    /// Return the shape of the array subset.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// Returns true if the array subset is empty (i.e. has a zero element in its shape).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shape.iter().any(|i| i == &0)
    }

    /// Return the dimensionality of the array subset.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.start.len()
    }

    /// Return the end (exclusive) of the array subset.
    #[must_use]
    pub fn end_exc(&self) -> ArrayIndices {
        std::iter::zip(&self.start, &self.shape)
            .map(|(start, size)| start + size)
            .collect()
    }

    /// Return the number of elements of the array subset.
    ///
    /// Equal to the product of the components of its shape.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Return the number of elements of the array subset as a `usize`.
    ///
    /// # Panics
    /// Panics if [`num_elements()`](Self::num_elements()) is greater than [`usize::MAX`].
    #[must_use]
    pub fn num_elements_usize(&self) -> usize {
        usize::try_from(self.num_elements()).unwrap()
    }

    /// Returns [`true`] if the array subset contains `indices`.
    #[must_use]
    pub fn contains(&self, indices: &[u64]) -> bool {
        indices.len() == self.dimensionality()
            && izip!(indices, &self.start, &self.shape).all(|(&i, &o, &s)| i >= o && i < o + s)
    }

    /// Return the overlapping subset between this array subset and `other`.
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if the dimensionality of `other` does not match the dimensionality of this array subset.
    pub fn overlap(&self, other: &Self) -> Result<Self, IncompatibleDimensionalityError> {
        if other.dimensionality() != self.dimensionality() {
            return Err(IncompatibleDimensionalityError::new(
                other.dimensionality(),
                self.dimensionality(),
            ));
        }
        let ranges: Vec<Range<u64>> = izip!(&self.start, &self.shape, other.start(), other.shape())
            .map(|(start, size, other_start, other_size)| {
                let overlap_start = *start.max(other_start);
                let overlap_end = (start + size).min(other_start + other_size);
                overlap_start..overlap_end.max(overlap_start)
            })
            .collect();
        Ok(Self::new_with_ranges(&ranges))
    }

    /// Return the subset relative to `start`.
    ///
    /// Creates an array subset starting at [`ArraySubset::start()`] - `start`.
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if the length of `start` does not match the
    /// dimensionality of this array subset.
    pub fn relative_to(&self, start: &[u64]) -> Result<Self, IncompatibleDimensionalityError> {
        if start.len() != self.dimensionality() {
            return Err(IncompatibleDimensionalityError::new(
                start.len(),
                self.dimensionality(),
            ));
        }
        Ok(Self {
            start: std::iter::zip(&self.start, start)
                .map(|(a, b)| a.saturating_sub(*b))
                .collect(),
            shape: self.shape.clone(),
        })
    }

    /// Returns true if the array subset is within the bounds of `array_shape`.
    #[must_use]
    pub fn inbounds(&self, array_shape: &[u64]) -> bool {
        self.dimensionality() == array_shape.len()
            && izip!(&self.start, &self.shape, array_shape)
                .all(|(start, size, shape)| start + size <= *shape)
    }

    /// Returns an iterator over the indices of elements within the subset in C order.
    #[must_use]
    pub fn indices(&self) -> Indices {
        Indices::new(self.clone())
    }

    /// Copy the bytes of this subset out of a C-order array with `array_shape` and `element_size`.
    ///
    /// # Errors
    /// Returns [`IncompatibleArraySubsetAndShapeError`] if `bytes` does not match `array_shape` and
    /// `element_size`, or the subset is out of bounds of `array_shape`.
    pub fn extract_bytes(
        &self,
        bytes: &[u8],
        array_shape: &[u64],
        element_size: usize,
    ) -> Result<Vec<u8>, IncompatibleArraySubsetAndShapeError> {
        self.validate_array(bytes.len(), array_shape, element_size)?;
        let mut out = vec![0u8; self.num_elements_usize() * element_size];
        let mut out_offset = 0;
        for (array_offset, run_len) in self.contiguous_runs(array_shape) {
            let src = array_offset * element_size;
            let len = run_len * element_size;
            out[out_offset..out_offset + len].copy_from_slice(&bytes[src..src + len]);
            out_offset += len;
        }
        Ok(out)
    }

    /// Copy `subset_bytes` (C order, shaped to this subset) into a C-order array with
    /// `array_shape` and `element_size`.
    ///
    /// # Errors
    /// Returns [`IncompatibleArraySubsetAndShapeError`] if the byte lengths do not match the
    /// shapes, or the subset is out of bounds of `array_shape`.
    pub fn inject_bytes(
        &self,
        subset_bytes: &[u8],
        bytes: &mut [u8],
        array_shape: &[u64],
        element_size: usize,
    ) -> Result<(), IncompatibleArraySubsetAndShapeError> {
        self.validate_array(bytes.len(), array_shape, element_size)?;
        if subset_bytes.len() != self.num_elements_usize() * element_size {
            return Err(IncompatibleArraySubsetAndShapeError::new(
                self.clone(),
                array_shape.to_vec(),
            ));
        }
        let mut in_offset = 0;
        for (array_offset, run_len) in self.contiguous_runs(array_shape) {
            let dst = array_offset * element_size;
            let len = run_len * element_size;
            bytes[dst..dst + len].copy_from_slice(&subset_bytes[in_offset..in_offset + len]);
            in_offset += len;
        }
        Ok(())
    }

    fn validate_array(
        &self,
        byte_len: usize,
        array_shape: &[u64],
        element_size: usize,
    ) -> Result<(), IncompatibleArraySubsetAndShapeError> {
        let array_elements = array_shape.iter().product::<u64>();
        if byte_len as u64 == array_elements * element_size as u64 && self.inbounds(array_shape) {
            Ok(())
        } else {
            Err(IncompatibleArraySubsetAndShapeError::new(
                self.clone(),
                array_shape.to_vec(),
            ))
        }
    }

    /// Linearised (offset, length) element runs of this subset in an array with `array_shape`,
    /// one run per innermost row.
    fn contiguous_runs(&self, array_shape: &[u64]) -> Vec<(usize, usize)> {
        if self.is_empty() {
            return Vec::new();
        }
        let ndim = self.dimensionality();
        if ndim == 0 {
            return vec![(0, 1)];
        }
        let strides = c_order_strides(array_shape);
        let run_len = usize::try_from(self.shape[ndim - 1]).unwrap();
        let outer = Self {
            start: self.start[..ndim - 1].to_vec(),
            shape: self.shape[..ndim - 1].to_vec(),
        };
        let mut runs = Vec::with_capacity(outer.num_elements_usize());
        for outer_indices in &outer.indices() {
            let offset: u64 = izip!(&outer_indices, &strides[..ndim - 1])
                .map(|(i, s)| i * s)
                .sum::<u64>()
                + self.start[ndim - 1] * strides[ndim - 1];
            runs.push((usize::try_from(offset).unwrap(), run_len));
        }
        runs
    }
}

/// The C-order (row-major) element strides of an array with `shape`.
#[must_use]
pub fn c_order_strides(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// An incompatible dimensionality error.
#[derive(Copy, Clone, Debug, Error)]
#[error("incompatible dimensionality {0}, expected {1}")]
pub struct IncompatibleDimensionalityError(usize, usize);

impl IncompatibleDimensionalityError {
    /// Create a new incompatible dimensionality error.
    #[must_use]
    pub const fn new(got: usize, expected: usize) -> Self {
        Self(got, expected)
    }
}

/// An incompatible array subset and array shape error.
#[derive(Clone, Debug, Error, From)]
#[error("incompatible array subset {0} with array shape {1:?}")]
pub struct IncompatibleArraySubsetAndShapeError(ArraySubset, ArrayShape);

impl IncompatibleArraySubsetAndShapeError {
    /// Create a new incompatible array subset and shape error.
    #[must_use]
    pub fn new(array_subset: ArraySubset, array_shape: ArrayShape) -> Self {
        Self(array_subset, array_shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_subset() {
        assert!(ArraySubset::new_with_start_shape(vec![0, 0], vec![10, 10]).is_ok());
        assert!(ArraySubset::new_with_start_shape(vec![0, 0], vec![10]).is_err());

        let array_subset = ArraySubset::new_with_start_shape(vec![0, 0], vec![10, 10])
            .unwrap()
            .bound(&[5, 5])
            .unwrap();
        assert_eq!(array_subset.shape(), &[5, 5]);
        assert!(ArraySubset::new_with_start_shape(vec![0, 0], vec![10, 10])
            .unwrap()
            .bound(&[5, 5, 5])
            .is_err());

        let array_subset0 = ArraySubset::new_with_ranges(&[1..5, 2..6]);
        let array_subset1 = ArraySubset::new_with_ranges(&[3..6, 4..7]);
        assert_eq!(
            array_subset0.overlap(&array_subset1).unwrap(),
            ArraySubset::new_with_ranges(&[3..5, 4..6])
        );
        assert_eq!(
            array_subset0.relative_to(&[1, 1]).unwrap(),
            ArraySubset::new_with_ranges(&[0..4, 1..5])
        );
        assert!(array_subset0.relative_to(&[1, 1, 1]).is_err());
        assert!(array_subset0.inbounds(&[10, 10]));
        assert!(!array_subset0.inbounds(&[2, 2]));
        assert!(!array_subset0.inbounds(&[10, 10, 10]));
        assert!(array_subset0.contains(&[1, 2]));
        assert!(!array_subset0.contains(&[5, 2]));

        let disjoint = ArraySubset::new_with_ranges(&[6..8, 0..1]);
        assert!(array_subset0.overlap(&disjoint).unwrap().is_empty());
    }

    #[test]
    fn extract_and_inject() {
        // 4x4 array of u16 with elements 0..16
        let elements: Vec<u16> = (0..16).collect();
        let bytes: Vec<u8> = elements.iter().flat_map(|e| e.to_ne_bytes()).collect();

        let subset = ArraySubset::new_with_ranges(&[1..3, 1..3]);
        let extracted = subset.extract_bytes(&bytes, &[4, 4], 2).unwrap();
        let extracted: Vec<u16> = extracted
            .chunks_exact(2)
            .map(|b| u16::from_ne_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(extracted, vec![5, 6, 9, 10]);

        let mut target = vec![0u8; 16 * 2];
        let patch: Vec<u8> = [1u16, 2, 3, 4]
            .iter()
            .flat_map(|e| e.to_ne_bytes())
            .collect();
        subset.inject_bytes(&patch, &mut target, &[4, 4], 2).unwrap();
        let target: Vec<u16> = target
            .chunks_exact(2)
            .map(|b| u16::from_ne_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(target[5], 1);
        assert_eq!(target[6], 2);
        assert_eq!(target[9], 3);
        assert_eq!(target[10], 4);
        assert_eq!(target[0], 0);

        assert!(subset.extract_bytes(&bytes, &[2, 2], 2).is_err());
    }

    #[test]
    fn scalar_subset() {
        let subset = ArraySubset::new_with_shape(vec![]);
        assert_eq!(subset.num_elements(), 1);
        let bytes = 7.0f32.to_ne_bytes().to_vec();
        assert_eq!(subset.extract_bytes(&bytes, &[], 4).unwrap(), bytes);
    }

    #[test]
    fn strides() {
        assert_eq!(c_order_strides(&[4, 3, 2]), vec![6, 2, 1]);
        assert_eq!(c_order_strides(&[]), Vec::<u64>::new());
    }
}
