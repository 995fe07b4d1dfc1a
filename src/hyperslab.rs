//! User-facing variable slices.
//!
//! A [`Hyperslab`] is a per-dimension list of `start:stop:step` selections
//! with optionally negative or open bounds, in the style of the slicing
//! surface of array libraries. [`Hyperslab::normalise`] resolves a hyperslab
//! against a variable shape into a [`NormalisedSlab`]: resolved starts, steps,
//! and the output shape of the selection.
//!
//! Write paths require unit steps; read paths gather through the step lattice.

use std::ops::Range;

use thiserror::Error;

use crate::array_subset::ArraySubset;

/// A `start:stop:step` selection along one dimension.
///
/// `None` bounds are open (start of dimension / end of dimension). Negative
/// bounds are resolved against the dimension length. The step must be
/// positive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DimSlice {
    /// The start of the selection, open if [`None`].
    pub start: Option<i64>,
    /// The end (exclusive) of the selection, open if [`None`].
    pub stop: Option<i64>,
    /// The step of the selection.
    pub step: i64,
}

impl DimSlice {
    /// Create a new selection.
    #[must_use]
    pub const fn new(start: Option<i64>, stop: Option<i64>, step: i64) -> Self {
        Self { start, stop, step }
    }

    /// The full selection `..` along a dimension.
    #[must_use]
    pub const fn full() -> Self {
        Self::new(None, None, 1)
    }

    /// The selection of the single index `index`, keeping the dimension (length 1).
    #[must_use]
    pub const fn single(index: i64) -> Self {
        Self::new(Some(index), Some(index + 1), 1)
    }

    /// The selection `start..stop` with unit step.
    #[must_use]
    pub const fn range(start: i64, stop: i64) -> Self {
        Self::new(Some(start), Some(stop), 1)
    }
}

/// A multidimensional selection on a variable, one [`DimSlice`] per dimension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hyperslab(Vec<DimSlice>);

impl Hyperslab {
    /// Create a hyperslab from per-dimension selections.
    #[must_use]
    pub fn new(slices: Vec<DimSlice>) -> Self {
        Self(slices)
    }

    /// The full selection over `dimensionality` dimensions.
    #[must_use]
    pub fn full(dimensionality: usize) -> Self {
        Self(vec![DimSlice::full(); dimensionality])
    }

    /// Create a hyperslab of unit-step selections from index ranges.
    ///
    /// # Panics
    /// Panics if a range bound exceeds [`i64::MAX`].
    #[must_use]
    pub fn from_ranges(ranges: &[Range<u64>]) -> Self {
        Self(
            ranges
                .iter()
                .map(|range| {
                    DimSlice::range(
                        i64::try_from(range.start).unwrap(),
                        i64::try_from(range.end).unwrap(),
                    )
                })
                .collect(),
        )
    }

    /// The per-dimension selections.
    #[must_use]
    pub fn slices(&self) -> &[DimSlice] {
        &self.0
    }

    /// The dimensionality of the hyperslab.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.0.len()
    }

    /// Resolve the hyperslab against `shape`.
    ///
    /// Negative bounds are resolved against the dimension length and out-of-range bounds are
    /// clamped to it.
    ///
    /// # Errors
    /// Returns [`HyperslabError`] if the dimensionality does not match `shape` or a step is not
    /// positive.
    pub fn normalise(&self, shape: &[u64]) -> Result<NormalisedSlab, HyperslabError> {
        self.normalise_inner(shape, None)
    }

    /// Resolve the hyperslab against `shape` for a write that may grow an unlimited dimension.
    ///
    /// Explicit bounds on the axis `unlimited` are not clamped; the resulting slab may extend
    /// beyond the current dimension length, and its required extent is reported by
    /// [`NormalisedSlab::end_exc`].
    ///
    /// # Errors
    /// As [`Hyperslab::normalise`].
    pub fn normalise_extending(
        &self,
        shape: &[u64],
        unlimited: Option<usize>,
    ) -> Result<NormalisedSlab, HyperslabError> {
        self.normalise_inner(shape, unlimited)
    }

    fn normalise_inner(
        &self,
        shape: &[u64],
        unlimited: Option<usize>,
    ) -> Result<NormalisedSlab, HyperslabError> {
        if self.0.len() != shape.len() {
            return Err(HyperslabError::IncompatibleDimensionality {
                got: self.0.len(),
                expected: shape.len(),
            });
        }
        let mut start = Vec::with_capacity(shape.len());
        let mut steps = Vec::with_capacity(shape.len());
        let mut out_shape = Vec::with_capacity(shape.len());
        for (d, (slice, &len)) in std::iter::zip(&self.0, shape).enumerate() {
            if slice.step <= 0 {
                return Err(HyperslabError::NonPositiveStep {
                    dim: d,
                    step: slice.step,
                });
            }
            let step = slice.step.unsigned_abs();
            let clamp = unlimited != Some(d);
            let begin = resolve_bound(slice.start, len, clamp).unwrap_or(0);
            let end = resolve_bound(slice.stop, len, clamp).unwrap_or(len);
            start.push(begin);
            steps.push(step);
            out_shape.push(if end > begin {
                (end - begin).div_ceil(step)
            } else {
                0
            });
        }
        Ok(NormalisedSlab {
            start,
            steps,
            shape: out_shape,
        })
    }
}

impl From<Vec<DimSlice>> for Hyperslab {
    fn from(slices: Vec<DimSlice>) -> Self {
        Self::new(slices)
    }
}

fn resolve_bound(bound: Option<i64>, len: u64, clamp: bool) -> Option<u64> {
    let bound = bound?;
    let resolved = if bound < 0 {
        len.saturating_sub(bound.unsigned_abs())
    } else {
        bound.unsigned_abs()
    };
    Some(if clamp { resolved.min(len) } else { resolved })
}

/// A hyperslab resolved against a variable shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalisedSlab {
    start: Vec<u64>,
    steps: Vec<u64>,
    shape: Vec<u64>,
}

impl NormalisedSlab {
    /// The resolved start index along each dimension.
    #[must_use]
    pub fn start(&self) -> &[u64] {
        &self.start
    }

    /// The step along each dimension.
    #[must_use]
    pub fn steps(&self) -> &[u64] {
        &self.steps
    }

    /// The output shape of the selection.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// The dimensionality of the selection.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.start.len()
    }

    /// The number of selected elements.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Returns true if no elements are selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shape.iter().any(|s| *s == 0)
    }

    /// Returns true if every step is 1.
    #[must_use]
    pub fn is_unit(&self) -> bool {
        self.steps.iter().all(|s| *s == 1)
    }

    /// The end (exclusive) of the selection along each dimension: the index one past the last
    /// selected element.
    #[must_use]
    pub fn end_exc(&self) -> Vec<u64> {
        itertools::izip!(&self.start, &self.steps, &self.shape)
            .map(|(start, step, count)| {
                if *count == 0 {
                    *start
                } else {
                    start + (count - 1) * step + 1
                }
            })
            .collect()
    }

    /// The bounding [`ArraySubset`] of the selection (tight for unit steps).
    #[must_use]
    pub fn bounding_subset(&self) -> ArraySubset {
        let ranges: Vec<Range<u64>> = std::iter::zip(&self.start, self.end_exc())
            .map(|(&start, end)| start..end)
            .collect();
        ArraySubset::new_with_ranges(&ranges)
    }

    /// Require all steps to be 1 (write paths).
    ///
    /// # Errors
    /// Returns [`HyperslabError::NonUnitStep`] for the first dimension with a non-unit step.
    pub fn require_unit_steps(&self) -> Result<(), HyperslabError> {
        match self.steps.iter().position(|s| *s != 1) {
            None => Ok(()),
            Some(dim) => Err(HyperslabError::NonUnitStep {
                dim,
                step: self.steps[dim],
            }),
        }
    }
}

/// A hyperslab resolution error.
#[derive(Clone, Debug, Error)]
pub enum HyperslabError {
    /// The hyperslab dimensionality does not match the variable.
    #[error("hyperslab has {got} dimensions, expected {expected}")]
    IncompatibleDimensionality {
        /// Dimensionality of the hyperslab.
        got: usize,
        /// Dimensionality of the variable.
        expected: usize,
    },
    /// A step was zero or negative.
    #[error("step {step} along dimension {dim} is not positive")]
    NonPositiveStep {
        /// The offending dimension.
        dim: usize,
        /// The offending step.
        step: i64,
    },
    /// A non-unit step was used where only unit steps are supported.
    #[error("step {step} along dimension {dim} is not supported when writing")]
    NonUnitStep {
        /// The offending dimension.
        dim: usize,
        /// The offending step.
        step: u64,
    },
}
