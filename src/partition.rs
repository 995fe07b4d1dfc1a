//! Partitioned-variable tiling.
//!
//! A [`PartitionMatrix`] is the n-dimensional grid of [`Partition`]
//! descriptors that tiles a partitioned variable's logical shape, one axis
//! per variable dimension. Tiles are regular apart from shortened terminal
//! tiles on axes the tile length does not divide. Each descriptor records the
//! tile's region of the logical array and, once a write has touched the tile,
//! the subarray file holding its data.

pub mod index;

use thiserror::Error;

use crate::array_subset::ArraySubset;
use crate::structured::FileFormat;
use crate::uri::Uri;

pub use index::{IndexEntry, StridedSlab};

/// A partition descriptor: one tile of a partitioned variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    /// The indices of the tile in the partition matrix.
    pub index: Vec<u64>,
    /// The tile's region of the logical array, inclusive-exclusive per axis.
    pub location: Vec<(u64, u64)>,
    /// The shape of the tile; equals the per-axis location extents.
    pub shape: Vec<u64>,
    /// The subarray file holding the tile's data; [`None`] until a write first touches the tile.
    pub file: Option<Uri>,
    /// The format of the subarray file.
    pub format: FileFormat,
    /// The name of the field variable within the subarray file.
    pub in_file_variable: String,
}

impl Partition {
    /// The tile's region of the logical array as an [`ArraySubset`].
    #[must_use]
    pub fn subset(&self) -> ArraySubset {
        let ranges: Vec<std::ops::Range<u64>> =
            self.location.iter().map(|&(start, end)| start..end).collect();
        ArraySubset::new_with_ranges(&ranges)
    }

    /// The number of elements in the tile.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }
}

/// The n-dimensional grid of [`Partition`] descriptors of a partitioned variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionMatrix {
    array_shape: Vec<u64>,
    tile_shape: Vec<u64>,
    grid_shape: Vec<u64>,
    /// Per axis, the `grid_shape[d] + 1` tile boundaries.
    axis_edges: Vec<Vec<u64>>,
    /// Dense descriptors in row-major order over the grid.
    partitions: Vec<Partition>,
}

impl PartitionMatrix {
    /// Create a regular partition matrix over `array_shape` with nominal `tile_shape`.
    ///
    /// Axis lengths not divisible by the tile length produce shorter terminal tiles.
    ///
    /// # Errors
    /// Returns a [`PartitioningError`] if the tile shape does not match the array dimensionality,
    /// has a zero component, or exceeds the array shape.
    pub fn new_regular(
        array_shape: Vec<u64>,
        tile_shape: Vec<u64>,
        format: FileFormat,
        in_file_variable: &str,
    ) -> Result<Self, PartitioningError> {
        if tile_shape.len() != array_shape.len() {
            return Err(PartitioningError::IncompatibleDimensionality {
                got: tile_shape.len(),
                expected: array_shape.len(),
            });
        }
        for (d, (&tile, &len)) in std::iter::zip(&tile_shape, &array_shape).enumerate() {
            if tile == 0 || len == 0 {
                return Err(PartitioningError::ZeroLength { dim: d });
            }
            if tile > len {
                return Err(PartitioningError::TileExceedsArray {
                    dim: d,
                    tile,
                    len,
                });
            }
        }
        let grid_shape: Vec<u64> = std::iter::zip(&array_shape, &tile_shape)
            .map(|(&len, &tile)| len.div_ceil(tile))
            .collect();
        let axis_edges: Vec<Vec<u64>> = itertools::izip!(&array_shape, &tile_shape, &grid_shape)
            .map(|(&len, &tile, &count)| {
                (0..=count).map(|k| (k * tile).min(len)).collect()
            })
            .collect();

        let mut partitions = Vec::with_capacity(
            usize::try_from(grid_shape.iter().product::<u64>()).unwrap_or(0),
        );
        for index in &ArraySubset::new_with_shape(grid_shape.clone()).indices() {
            let location: Vec<(u64, u64)> = std::iter::zip(&index, &axis_edges)
                .map(|(&k, edges)| {
                    let k = usize::try_from(k).unwrap();
                    (edges[k], edges[k + 1])
                })
                .collect();
            let shape = location.iter().map(|&(start, end)| end - start).collect();
            partitions.push(Partition {
                index,
                location,
                shape,
                file: None,
                format,
                in_file_variable: in_file_variable.to_string(),
            });
        }
        Ok(Self {
            array_shape,
            tile_shape,
            grid_shape,
            axis_edges,
            partitions,
        })
    }

    /// The logical shape of the variable.
    #[must_use]
    pub fn array_shape(&self) -> &[u64] {
        &self.array_shape
    }

    /// The nominal tile shape (terminal tiles may be shorter).
    #[must_use]
    pub fn tile_shape(&self) -> &[u64] {
        &self.tile_shape
    }

    /// The number of tiles along each axis.
    #[must_use]
    pub fn grid_shape(&self) -> &[u64] {
        &self.grid_shape
    }

    /// The dimensionality of the grid.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.grid_shape.len()
    }

    /// The total number of tiles.
    #[must_use]
    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// The row-major position of the tile at `indices`.
    #[must_use]
    pub fn linear_index(&self, indices: &[u64]) -> Option<usize> {
        if indices.len() != self.grid_shape.len()
            || std::iter::zip(indices, &self.grid_shape).any(|(i, len)| i >= len)
        {
            return None;
        }
        let mut linear = 0u64;
        for (i, len) in std::iter::zip(indices, &self.grid_shape) {
            linear = linear * len + i;
        }
        usize::try_from(linear).ok()
    }

    /// The partition at `indices`.
    #[must_use]
    pub fn partition(&self, indices: &[u64]) -> Option<&Partition> {
        self.linear_index(indices).map(|i| &self.partitions[i])
    }

    /// The partition at `indices`, mutably.
    #[must_use]
    pub fn partition_mut(&mut self, indices: &[u64]) -> Option<&mut Partition> {
        self.linear_index(indices)
            .map(|i| &mut self.partitions[i])
    }

    /// All partitions in row-major order.
    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter()
    }

    /// All partitions whose tile has been written (file assigned), in row-major order.
    pub fn written_partitions(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter().filter(|p| p.file.is_some())
    }

    /// Check the internal invariants of the matrix: per-axis extents match tile shapes and the
    /// tiles exactly cover the array shape.
    ///
    /// # Errors
    /// Returns [`PartitioningError::BrokenInvariant`] describing the first violated invariant.
    pub fn validate(&self) -> Result<(), PartitioningError> {
        for (d, edges) in self.axis_edges.iter().enumerate() {
            if edges.first() != Some(&0) || edges.last() != Some(&self.array_shape[d]) {
                return Err(PartitioningError::BrokenInvariant(format!(
                    "axis {d} edges do not cover the array"
                )));
            }
            if edges.windows(2).any(|w| w[0] >= w[1]) {
                return Err(PartitioningError::BrokenInvariant(format!(
                    "axis {d} edges are not strictly increasing"
                )));
            }
        }
        for partition in &self.partitions {
            if partition
                .location
                .iter()
                .zip(&partition.shape)
                .any(|(&(start, end), &shape)| end - start != shape)
            {
                return Err(PartitioningError::BrokenInvariant(format!(
                    "partition {:?} shape does not match its location",
                    partition.index
                )));
            }
        }
        let mut seen = std::collections::BTreeSet::new();
        for partition in self.partitions.iter().filter_map(|p| p.file.as_ref()) {
            if !seen.insert(partition.as_str()) {
                return Err(PartitioningError::BrokenInvariant(format!(
                    "subarray file {partition} is assigned to more than one tile"
                )));
            }
        }
        Ok(())
    }
}

/// Choose a tile shape such that the per-subarray byte size is at most `max_bytes`.
///
/// The remaining freedom is spent keeping tiles as near-cubical as possible, splitting the axis
/// classified as time first.
///
/// # Errors
/// Returns a [`PartitioningError`] if the array has a zero-length axis or a single element
/// already exceeds `max_bytes`.
pub fn tile_shape_for_max_bytes(
    array_shape: &[u64],
    element_size: usize,
    max_bytes: u64,
    time_axis: Option<usize>,
) -> Result<Vec<u64>, PartitioningError> {
    if let Some(dim) = array_shape.iter().position(|&len| len == 0) {
        return Err(PartitioningError::ZeroLength { dim });
    }
    if element_size as u64 > max_bytes {
        return Err(PartitioningError::ElementExceedsLimit {
            element_size,
            max_bytes,
        });
    }
    let mut tile = array_shape.to_vec();
    while tile.iter().product::<u64>() * element_size as u64 > max_bytes {
        let axis = match time_axis {
            Some(t) if tile[t] > 1 => t,
            _ => {
                // The longest remaining axis, first on ties.
                let (axis, _) = tile
                    .iter()
                    .enumerate()
                    .max_by_key(|&(i, len)| (*len, std::cmp::Reverse(i)))
                    .expect("non-empty shape");
                axis
            }
        };
        tile[axis] = tile[axis].div_ceil(2);
    }
    Ok(tile)
}

/// A partitioning error.
#[derive(Clone, Debug, Error)]
pub enum PartitioningError {
    /// The tile shape does not match the array dimensionality.
    #[error("tile shape has {got} dimensions, expected {expected}")]
    IncompatibleDimensionality {
        /// Dimensionality of the tile shape.
        got: usize,
        /// Dimensionality of the array.
        expected: usize,
    },
    /// A zero-length axis cannot be tiled.
    #[error("axis {dim} has zero length")]
    ZeroLength {
        /// The offending axis.
        dim: usize,
    },
    /// The tile shape exceeds the array shape.
    #[error("tile length {tile} exceeds array length {len} along axis {dim}")]
    TileExceedsArray {
        /// The offending axis.
        dim: usize,
        /// The tile length.
        tile: u64,
        /// The array length.
        len: u64,
    },
    /// A single element exceeds the subarray size bound.
    #[error("element size {element_size} exceeds the subarray size bound {max_bytes}")]
    ElementExceedsLimit {
        /// The element size in bytes.
        element_size: usize,
        /// The requested bound.
        max_bytes: u64,
    },
    /// A checked matrix invariant failed.
    #[error("partition matrix invariant broken: {0}")]
    BrokenInvariant(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_matrix() {
        let matrix =
            PartitionMatrix::new_regular(vec![4, 4], vec![2, 2], FileFormat::Hdf5, "t").unwrap();
        assert_eq!(matrix.grid_shape(), &[2, 2]);
        assert_eq!(matrix.num_partitions(), 4);
        let p = matrix.partition(&[1, 0]).unwrap();
        assert_eq!(p.location, vec![(2, 4), (0, 2)]);
        assert_eq!(p.shape, vec![2, 2]);
        assert_eq!(p.in_file_variable, "t");
        assert!(p.file.is_none());
        assert!(matrix.partition(&[2, 0]).is_none());
        matrix.validate().unwrap();
    }

    #[test]
    fn terminal_tiles_shorten() {
        // 10x10 with 3x3 tiles: 4x4 grid, terminal tiles of length 1.
        let matrix =
            PartitionMatrix::new_regular(vec![10, 10], vec![3, 3], FileFormat::Classic, "v")
                .unwrap();
        assert_eq!(matrix.grid_shape(), &[4, 4]);
        assert_eq!(matrix.partition(&[3, 0]).unwrap().shape, vec![1, 3]);
        assert_eq!(matrix.partition(&[0, 3]).unwrap().shape, vec![3, 1]);
        assert_eq!(matrix.partition(&[3, 3]).unwrap().shape, vec![1, 1]);
        matrix.validate().unwrap();

        // Tiles exactly cover the array.
        let covered: u64 = matrix.partitions().map(Partition::num_elements).sum();
        assert_eq!(covered, 100);
    }

    #[test]
    fn matrix_rejects() {
        assert!(PartitionMatrix::new_regular(vec![4], vec![2, 2], FileFormat::Hdf5, "t").is_err());
        assert!(PartitionMatrix::new_regular(vec![4, 4], vec![0, 2], FileFormat::Hdf5, "t").is_err());
        assert!(PartitionMatrix::new_regular(vec![4, 4], vec![5, 2], FileFormat::Hdf5, "t").is_err());
    }

    #[test]
    fn tile_shape_policy() {
        // 8 * 8 * f32 = 256 bytes; bound of 64 bytes needs a 4x split.
        let tile = tile_shape_for_max_bytes(&[8, 8], 4, 64, None).unwrap();
        assert!(tile.iter().product::<u64>() * 4 <= 64);
        // Near-cubical: both axes split evenly.
        assert_eq!(tile, vec![4, 4]);

        // A time axis is split first.
        let tile = tile_shape_for_max_bytes(&[8, 8], 4, 128, Some(0)).unwrap();
        assert_eq!(tile, vec![4, 8]);

        assert!(tile_shape_for_max_bytes(&[8, 0], 4, 64, None).is_err());
        assert!(tile_shape_for_max_bytes(&[8], 8, 4, None).is_err());
    }

    #[test]
    fn tile_shape_degenerate_to_single_elements() {
        let tile = tile_shape_for_max_bytes(&[5, 3], 8, 8, None).unwrap();
        assert_eq!(tile, vec![1, 1]);
    }
}
