//! Slice dispatch over a partition matrix.
//!
//! [`PartitionMatrix::index`] translates a normalised slice on the logical
//! variable into the ordered list of per-tile [`IndexEntry`] operations that
//! realise it: for each affected tile, where to read or write within the
//! subarray file (`source`) and where the elements land in the request's
//! output array (`target`).

use itertools::Itertools;

use crate::array_subset::{ArraySubset, IncompatibleDimensionalityError};
use crate::hyperslab::NormalisedSlab;

use super::PartitionMatrix;

/// A possibly strided slab within a subarray file.
///
/// Unit-step for writes; reads through a stepped hyperslab gather with per-axis steps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StridedSlab {
    start: Vec<u64>,
    steps: Vec<u64>,
    shape: Vec<u64>,
}

impl StridedSlab {
    /// The start index along each axis.
    #[must_use]
    pub fn start(&self) -> &[u64] {
        &self.start
    }

    /// The step along each axis.
    #[must_use]
    pub fn steps(&self) -> &[u64] {
        &self.steps
    }

    /// The number of selected elements along each axis.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// Returns true if every step is 1.
    #[must_use]
    pub fn is_unit(&self) -> bool {
        self.steps.iter().all(|s| *s == 1)
    }

    /// The slab as a unit-step [`ArraySubset`], if it is one.
    #[must_use]
    pub fn as_subset(&self) -> Option<ArraySubset> {
        self.is_unit().then(|| {
            ArraySubset::new_with_start_shape(self.start.clone(), self.shape.clone())
                .expect("start and shape have equal length")
        })
    }

    /// The tight bounding unit-step [`ArraySubset`] of the slab.
    #[must_use]
    pub fn bounding_subset(&self) -> ArraySubset {
        let ranges: Vec<std::ops::Range<u64>> =
            itertools::izip!(&self.start, &self.steps, &self.shape)
                .map(|(&start, &step, &count)| {
                    let end = if count == 0 {
                        start
                    } else {
                        start + (count - 1) * step + 1
                    };
                    start..end
                })
                .collect();
        ArraySubset::new_with_ranges(&ranges)
    }
}

/// One per-tile operation of a slice dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    /// The indices of the affected tile in the partition matrix.
    pub partition: Vec<u64>,
    /// The slab within the subarray file.
    pub source: StridedSlab,
    /// Where the slab's elements land in the request's output array.
    pub target: ArraySubset,
}

impl PartitionMatrix {
    /// Translate a normalised slice into per-tile operations.
    ///
    /// Entries are ordered row-major over partition indices. The `target` regions of the entries
    /// exactly tile the slice's output shape.
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if the slice dimensionality does not match the
    /// matrix.
    pub fn index(
        &self,
        slab: &NormalisedSlab,
    ) -> Result<Vec<IndexEntry>, IncompatibleDimensionalityError> {
        if slab.dimensionality() != self.dimensionality() {
            return Err(IncompatibleDimensionalityError::new(
                slab.dimensionality(),
                self.dimensionality(),
            ));
        }
        if slab.is_empty() {
            return Ok(Vec::new());
        }
        let bound = slab.end_exc();

        // Per axis, the tiles whose extent intersects the slice's bounding range.
        let mut candidates: Vec<Vec<u64>> = Vec::with_capacity(self.dimensionality());
        for (d, edges) in self.axis_edges.iter().enumerate() {
            let lo = slab.start()[d];
            let hi = bound[d];
            let mut axis = Vec::new();
            for k in 0..edges.len() - 1 {
                if edges[k] < hi && edges[k + 1] > lo {
                    axis.push(k as u64);
                }
            }
            candidates.push(axis);
        }

        let mut entries = Vec::new();
        'candidate: for indices in candidates
            .iter()
            .map(|axis| axis.iter().copied())
            .multi_cartesian_product()
        {
            let mut source_start = Vec::with_capacity(indices.len());
            let mut source_shape = Vec::with_capacity(indices.len());
            let mut target_start = Vec::with_capacity(indices.len());
            for (d, &k) in indices.iter().enumerate() {
                let k = usize::try_from(k).unwrap();
                let tile_start = self.axis_edges[d][k];
                let tile_end = self.axis_edges[d][k + 1];
                let step = slab.steps()[d];
                let start = slab.start()[d];

                // First selected index at or after the tile start, on the step lattice.
                let k0 = (tile_start.max(start) - start).div_ceil(step);
                let first = start + k0 * step;
                let end = bound[d].min(tile_end);
                if first >= end {
                    // The tile intersects the bounding range but holds no lattice point.
                    continue 'candidate;
                }
                let count = (end - first).div_ceil(step);
                source_start.push(first - tile_start);
                source_shape.push(count);
                target_start.push(k0);
            }
            let target =
                ArraySubset::new_with_start_shape(target_start, source_shape.clone())
                    .expect("start and shape have equal length");
            entries.push(IndexEntry {
                partition: indices,
                source: StridedSlab {
                    start: source_start,
                    steps: slab.steps().to_vec(),
                    shape: source_shape,
                },
                target,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use crate::hyperslab::{DimSlice, Hyperslab};
    use crate::structured::FileFormat;

    use super::*;

    fn matrix_10x10_tile3() -> PartitionMatrix {
        PartitionMatrix::new_regular(vec![10, 10], vec![3, 3], FileFormat::Hdf5, "v").unwrap()
    }

    #[test]
    fn index_covers_without_gaps_or_overlap() {
        let matrix = matrix_10x10_tile3();
        let slab = Hyperslab::from_ranges(&[2..8, 2..8])
            .normalise(matrix.array_shape())
            .unwrap();
        let entries = matrix.index(&slab).unwrap();
        assert_eq!(entries.len(), 9);

        // The targets exactly tile the 6x6 output.
        let mut hit = vec![0u32; 36];
        for entry in &entries {
            assert!(entry.source.is_unit());
            for indices in &entry.target.indices() {
                hit[usize::try_from(indices[0] * 6 + indices[1]).unwrap()] += 1;
            }
        }
        assert!(hit.iter().all(|&h| h == 1));
    }

    #[test]
    fn index_is_row_major() {
        let matrix = matrix_10x10_tile3();
        let slab = Hyperslab::from_ranges(&[2..8, 2..8])
            .normalise(matrix.array_shape())
            .unwrap();
        let entries = matrix.index(&slab).unwrap();
        let order: Vec<Vec<u64>> = entries.iter().map(|e| e.partition.clone()).collect();
        assert_eq!(
            order,
            vec![
                vec![0, 0],
                vec![0, 1],
                vec![0, 2],
                vec![1, 0],
                vec![1, 1],
                vec![1, 2],
                vec![2, 0],
                vec![2, 1],
                vec![2, 2],
            ]
        );
    }

    #[test]
    fn index_single_tile() {
        let matrix = matrix_10x10_tile3();
        let slab = Hyperslab::from_ranges(&[4..5, 4..5])
            .normalise(matrix.array_shape())
            .unwrap();
        let entries = matrix.index(&slab).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.partition, vec![1, 1]);
        assert_eq!(entry.source.start(), &[1, 1]);
        assert_eq!(entry.source.shape(), &[1, 1]);
        assert_eq!(entry.target, ArraySubset::new_with_ranges(&[0..1, 0..1]));
    }

    #[test]
    fn index_stepped() {
        // Step 3 over 0..10 selects 0, 3, 6, 9; tile length 3 puts one in each tile.
        let matrix = matrix_10x10_tile3();
        let slab = Hyperslab::new(vec![
            DimSlice::new(None, None, 3),
            DimSlice::single(0),
        ])
        .normalise(matrix.array_shape())
        .unwrap();
        let entries = matrix.index(&slab).unwrap();
        assert_eq!(entries.len(), 4);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.partition[0], i as u64);
            assert_eq!(entry.source.shape(), &[1, 1]);
            assert_eq!(entry.source.start()[0], 0);
            assert_eq!(
                entry.target,
                ArraySubset::new_with_ranges(&[i as u64..i as u64 + 1, 0..1])
            );
        }

        // Step 4 selects 0, 4, 8: tiles 0, 1, 2 hold one each, tile 3 intersects
        // the bounding range but holds no lattice point.
        let slab = Hyperslab::new(vec![
            DimSlice::new(None, None, 4),
            DimSlice::single(0),
        ])
        .normalise(matrix.array_shape())
        .unwrap();
        let entries = matrix.index(&slab).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].source.start(), &[1, 0]);
        assert_eq!(entries[2].source.start(), &[2, 0]);
    }

    #[test]
    fn index_empty_slice() {
        let matrix = matrix_10x10_tile3();
        let slab = Hyperslab::from_ranges(&[4..4, 0..10])
            .normalise(matrix.array_shape())
            .unwrap();
        assert!(matrix.index(&slab).unwrap().is_empty());
    }

    #[test]
    fn index_dimensionality_mismatch() {
        let matrix = matrix_10x10_tile3();
        let slab = Hyperslab::from_ranges(&[0..10]).normalise(&[10]).unwrap();
        assert!(matrix.index(&slab).is_err());
    }
}
