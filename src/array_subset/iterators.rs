//! Iterators over the contents of an [`ArraySubset`](super::ArraySubset).

use std::iter::FusedIterator;

use super::{ArrayIndices, ArraySubset};

/// An iterator over the indices in an array subset.
///
/// Iterates over the last dimension fastest (i.e. C-contiguous order).
/// For example, consider a 4x3 array with element indices
/// ```text
/// (0, 0)  (0, 1)  (0, 2)
/// (1, 0)  (1, 1)  (1, 2)
/// (2, 0)  (2, 1)  (2, 2)
/// (3, 0)  (3, 1)  (3, 2)
/// ```
/// An iterator with an array subset corresponding to the lower right 2x2 region will produce
/// `[(2, 1), (2, 2), (3, 1), (3, 2)]`.
pub struct Indices {
    subset: ArraySubset,
    length: usize,
}

impl Indices {
    /// Create a new indices struct.
    #[must_use]
    pub fn new(subset: ArraySubset) -> Self {
        let length = subset.num_elements_usize();
        Self { subset, length }
    }

    /// Return the number of indices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns true if the number of indices is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a new serial iterator.
    #[must_use]
    pub fn iter(&self) -> IndicesIterator<'_> {
        <&Self as IntoIterator>::into_iter(self)
    }
}

impl<'a> IntoIterator for &'a Indices {
    type Item = ArrayIndices;
    type IntoIter = IndicesIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        IndicesIterator {
            subset: &self.subset,
            next: if self.length == 0 {
                None
            } else {
                Some(self.subset.start().to_vec())
            },
            remaining: self.length,
        }
    }
}

/// Serial indices iterator.
///
/// See [`Indices`].
pub struct IndicesIterator<'a> {
    subset: &'a ArraySubset,
    next: Option<ArrayIndices>,
    remaining: usize,
}

impl Iterator for IndicesIterator<'_> {
    type Item = ArrayIndices;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.remaining -= 1;

        // Odometer increment, last dimension fastest.
        let mut next = current.clone();
        let start = self.subset.start();
        let shape = self.subset.shape();
        for d in (0..next.len()).rev() {
            next[d] += 1;
            if next[d] < start[d] + shape[d] {
                self.next = Some(next);
                break;
            }
            next[d] = start[d];
        }
        if self.remaining == 0 {
            self.next = None;
        }
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for IndicesIterator<'_> {}

impl FusedIterator for IndicesIterator<'_> {}
