//! Pure chunk-grid math shared by the writer and the reader.
//!
//! Everything here is side-effect free: a [`GridSpec`] is derived once from
//! the followed image's shape, chunk size, and the per-dimension scale, and
//! both components consult it for the same two mappings:
//!
//! - cell index tuple -> half-open coordinate-space bounds (write side), and
//! - pixel-space region -> covering set of cell index tuples (read side).
//!
//! Keeping the math in one place means the writer and the reader cannot
//! drift apart on cell boundaries or ceiling-division conventions.

use std::ops::{Range, RangeFrom, RangeFull, RangeTo};

use snafu::prelude::*;

/// Errors for invalid grid configuration supplied to the writer or found in
/// a metadata document.
#[derive(Debug, Snafu, PartialEq)]
#[snafu(visibility(pub(crate)))]
pub enum GridConfigError {
    /// `image_shape` and `image_chunksize` disagree on dimensionality.
    #[snafu(display(
        "image_shape has {shape_len} entries but image_chunksize has {chunksize_len}"
    ))]
    ImageArityMismatch {
        /// Number of entries in `image_shape`.
        shape_len: usize,
        /// Number of entries in `image_chunksize`.
        chunksize_len: usize,
    },

    /// More chunk columns were given than the image has dimensions.
    #[snafu(display(
        "cannot follow {follow_dims} chunk columns on a {image_dims}-dimensional image"
    ))]
    TooManyFollowDims {
        /// Number of chunk columns requested.
        follow_dims: usize,
        /// Dimensionality of the image.
        image_dims: usize,
    },

    /// No chunk columns were given; the grid would have no cells to address.
    #[snafu(display("at least one chunk column is required to follow an image"))]
    NoFollowDims,

    /// Followed shape and chunk size arrays disagree on length.
    #[snafu(display(
        "follow_shape has {shape_len} entries but follow_chunksize has {chunksize_len}"
    ))]
    FollowArityMismatch {
        /// Number of entries in the followed shape.
        shape_len: usize,
        /// Number of entries in the followed chunk size.
        chunksize_len: usize,
    },

    /// `chunk_scale` does not have one entry per chunk column.
    #[snafu(display("chunk_scale has {got} entries, expected {expected}"))]
    ScaleArityMismatch {
        /// Number of chunk columns.
        expected: usize,
        /// Number of scale entries supplied.
        got: usize,
    },

    /// A followed shape entry is zero.
    #[snafu(display("follow_shape[{dim}] must be positive"))]
    ZeroShape {
        /// The offending dimension.
        dim: usize,
    },

    /// A followed chunk size entry is zero.
    #[snafu(display("follow_chunksize[{dim}] must be positive"))]
    ZeroChunksize {
        /// The offending dimension.
        dim: usize,
    },

    /// A scale entry is not a positive finite number.
    #[snafu(display("chunk_scale[{dim}] must be positive and finite (got {value})"))]
    NonPositiveScale {
        /// The offending dimension.
        dim: usize,
        /// The rejected scale value.
        value: f64,
    },
}

/// One half-open interval `[start, stop)` over a single image dimension,
/// in image-pixel units.
///
/// A missing `start` defaults to `0`; a missing `stop` defaults to the full
/// followed extent of that dimension. Plain ranges convert directly:
///
/// ```
/// use chunk_follow_table::DimRange;
///
/// let explicit: DimRange = (100..900).into();
/// let everything: DimRange = (..).into();
/// assert_eq!(explicit.start, Some(100));
/// assert_eq!(everything.stop, None);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DimRange {
    /// Inclusive lower pixel bound, or `None` for the start of the dimension.
    pub start: Option<u64>,
    /// Exclusive upper pixel bound, or `None` for the full extent.
    pub stop: Option<u64>,
}

impl DimRange {
    /// A range with explicit bounds.
    pub fn new(start: Option<u64>, stop: Option<u64>) -> Self {
        DimRange { start, stop }
    }

    /// The full extent of a dimension.
    pub fn full() -> Self {
        DimRange::default()
    }

    fn resolve(&self, default_stop: u64) -> (u64, u64) {
        (self.start.unwrap_or(0), self.stop.unwrap_or(default_stop))
    }
}

impl From<Range<u64>> for DimRange {
    fn from(r: Range<u64>) -> Self {
        DimRange {
            start: Some(r.start),
            stop: Some(r.end),
        }
    }
}

impl From<RangeFrom<u64>> for DimRange {
    fn from(r: RangeFrom<u64>) -> Self {
        DimRange {
            start: Some(r.start),
            stop: None,
        }
    }
}

impl From<RangeTo<u64>> for DimRange {
    fn from(r: RangeTo<u64>) -> Self {
        DimRange {
            start: None,
            stop: Some(r.end),
        }
    }
}

impl From<RangeFull> for DimRange {
    fn from(_: RangeFull) -> Self {
        DimRange::default()
    }
}

/// Derived grid parameters for the followed dimensions of an image.
///
/// `follow_shape` and `follow_chunksize` are the leading entries of the
/// image's shape and chunk size, truncated to the number of chunk columns;
/// `follow_chunks[i]` is `ceil(follow_shape[i] / follow_chunksize[i])`, the
/// grid extent in cells. `chunk_scale[i]` converts a cell's pixel extent
/// into the corresponding table column's units.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    follow_shape: Vec<u64>,
    follow_chunksize: Vec<u64>,
    follow_chunks: Vec<u64>,
    chunk_scale: Vec<f64>,
}

impl GridSpec {
    /// Build a grid directly from followed shape, chunk size, and scale.
    ///
    /// All three slices must have the same non-zero length; shapes and chunk
    /// sizes must be positive, scales positive and finite.
    pub fn new(
        follow_shape: &[u64],
        follow_chunksize: &[u64],
        chunk_scale: &[f64],
    ) -> Result<Self, GridConfigError> {
        ensure!(!follow_shape.is_empty(), NoFollowDimsSnafu);
        ensure!(
            follow_shape.len() == follow_chunksize.len(),
            FollowArityMismatchSnafu {
                shape_len: follow_shape.len(),
                chunksize_len: follow_chunksize.len(),
            }
        );
        ensure!(
            chunk_scale.len() == follow_shape.len(),
            ScaleArityMismatchSnafu {
                expected: follow_shape.len(),
                got: chunk_scale.len(),
            }
        );
        for (dim, &extent) in follow_shape.iter().enumerate() {
            ensure!(extent > 0, ZeroShapeSnafu { dim });
        }
        for (dim, &size) in follow_chunksize.iter().enumerate() {
            ensure!(size > 0, ZeroChunksizeSnafu { dim });
        }
        for (dim, &scale) in chunk_scale.iter().enumerate() {
            ensure!(
                scale.is_finite() && scale > 0.0,
                NonPositiveScaleSnafu { dim, value: scale }
            );
        }

        let follow_chunks = follow_shape
            .iter()
            .zip(follow_chunksize)
            .map(|(&shape, &size)| shape.div_ceil(size))
            .collect();

        Ok(GridSpec {
            follow_shape: follow_shape.to_vec(),
            follow_chunksize: follow_chunksize.to_vec(),
            follow_chunks,
            chunk_scale: chunk_scale.to_vec(),
        })
    }

    /// Derive a grid from the full image shape and chunk size, following
    /// only the leading `follow_dims` dimensions.
    ///
    /// `chunk_scale` defaults to all-ones when `None`.
    pub fn derive(
        image_shape: &[u64],
        image_chunksize: &[u64],
        follow_dims: usize,
        chunk_scale: Option<&[f64]>,
    ) -> Result<Self, GridConfigError> {
        ensure!(
            image_shape.len() == image_chunksize.len(),
            ImageArityMismatchSnafu {
                shape_len: image_shape.len(),
                chunksize_len: image_chunksize.len(),
            }
        );
        ensure!(
            follow_dims <= image_shape.len(),
            TooManyFollowDimsSnafu {
                follow_dims,
                image_dims: image_shape.len(),
            }
        );

        let ones = vec![1.0; follow_dims];
        let scale = chunk_scale.unwrap_or(&ones);
        GridSpec::new(
            &image_shape[..follow_dims],
            &image_chunksize[..follow_dims],
            scale,
        )
    }

    /// Number of followed dimensions.
    pub fn follow_dims(&self) -> usize {
        self.follow_shape.len()
    }

    /// Followed image extent per dimension, in pixels.
    pub fn follow_shape(&self) -> &[u64] {
        &self.follow_shape
    }

    /// Followed chunk size per dimension, in pixels.
    pub fn follow_chunksize(&self) -> &[u64] {
        &self.follow_chunksize
    }

    /// Grid extent per dimension, in cells.
    pub fn follow_chunks(&self) -> &[u64] {
        &self.follow_chunks
    }

    /// Pixel-to-column-unit scale per dimension.
    pub fn chunk_scale(&self) -> &[f64] {
        &self.chunk_scale
    }

    /// Total number of cells in the grid.
    pub fn cell_count(&self) -> u64 {
        self.follow_chunks.iter().product()
    }

    /// Half-open coordinate-space bounds of one cell, per dimension, in the
    /// table column's own units: `[idx * chunksize * scale,
    /// (idx + 1) * chunksize * scale)`.
    pub fn cell_bounds(&self, cell: &[u64]) -> Vec<(f64, f64)> {
        debug_assert_eq!(cell.len(), self.follow_dims());
        cell.iter()
            .zip(&self.follow_chunksize)
            .zip(&self.chunk_scale)
            .map(|((&idx, &size), &scale)| {
                let lower = (idx * size) as f64 * scale;
                let upper = ((idx + 1) * size) as f64 * scale;
                (lower, upper)
            })
            .collect()
    }

    /// Iterate over every cell index tuple of the full grid.
    pub fn cells(&self) -> CellIter {
        CellIter::new(
            vec![0; self.follow_dims()],
            self.follow_chunks.clone(),
        )
    }

    /// Iterate over the cells covering the given per-dimension pixel ranges.
    ///
    /// For each dimension the covered cell interval is
    /// `[floor(start / chunksize), ceil(stop / chunksize))`. The result is
    /// not clamped to the grid: a range reaching past the followed extent
    /// yields index tuples for which no chunk file was ever written, and the
    /// reader surfaces those as missing chunks.
    pub fn covering(&self, ranges: &[DimRange]) -> CellIter {
        debug_assert_eq!(ranges.len(), self.follow_dims());
        let mut first = Vec::with_capacity(ranges.len());
        let mut last = Vec::with_capacity(ranges.len());
        for ((range, &size), &extent) in ranges
            .iter()
            .zip(&self.follow_chunksize)
            .zip(&self.follow_shape)
        {
            let (start, stop) = range.resolve(extent);
            first.push(start / size);
            last.push(stop.div_ceil(size));
        }
        CellIter::new(first, last)
    }
}

/// Odometer iterator over a rectangular region of cell index tuples.
///
/// Yields every tuple in `∏ [first[i], last[i])` with the last dimension
/// varying fastest. An empty interval in any dimension makes the whole
/// iterator empty.
pub struct CellIter {
    first: Vec<u64>,
    last: Vec<u64>,
    cur: Vec<u64>,
    started: bool,
    done: bool,
}

impl CellIter {
    fn new(first: Vec<u64>, last: Vec<u64>) -> Self {
        let done = first.is_empty() || first.iter().zip(&last).any(|(f, l)| f >= l);
        let cur = first.clone();
        CellIter {
            first,
            last,
            cur,
            started: false,
            done,
        }
    }
}

impl Iterator for CellIter {
    type Item = Vec<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            return Some(self.cur.clone());
        }
        for i in (0..self.cur.len()).rev() {
            self.cur[i] += 1;
            if self.cur[i] < self.last[i] {
                return Some(self.cur.clone());
            }
            self.cur[i] = self.first[i];
        }
        self.done = true;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Grid from the reference dataset: a 2048x2048 image with 500-pixel
    /// chunks and a 16 nm/pixel scale on both followed axes.
    fn reference_grid() -> GridSpec {
        GridSpec::derive(
            &[2048, 2048, 20, 1, 1],
            &[500, 500, 20, 1, 1],
            2,
            Some(&[16.0, 16.0]),
        )
        .unwrap()
    }

    #[test]
    fn derive_truncates_and_ceils() {
        let grid = reference_grid();
        assert_eq!(grid.follow_shape(), &[2048, 2048]);
        assert_eq!(grid.follow_chunksize(), &[500, 500]);
        assert_eq!(grid.follow_chunks(), &[5, 5]);
        assert_eq!(grid.cell_count(), 25);
    }

    #[test]
    fn derive_defaults_scale_to_ones() {
        let grid = GridSpec::derive(&[10, 10], &[4, 4], 2, None).unwrap();
        assert_eq!(grid.chunk_scale(), &[1.0, 1.0]);
        assert_eq!(grid.follow_chunks(), &[3, 3]);
    }

    #[test]
    fn derive_rejects_too_many_follow_dims() {
        let err = GridSpec::derive(&[10, 10], &[5, 5], 3, None).unwrap_err();
        assert_eq!(
            err,
            GridConfigError::TooManyFollowDims {
                follow_dims: 3,
                image_dims: 2,
            }
        );
    }

    #[test]
    fn derive_rejects_zero_follow_dims() {
        let err = GridSpec::derive(&[10, 10], &[5, 5], 0, None).unwrap_err();
        assert_eq!(err, GridConfigError::NoFollowDims);
    }

    #[test]
    fn derive_rejects_scale_arity_mismatch() {
        let err = GridSpec::derive(&[10, 10], &[5, 5], 2, Some(&[2.0])).unwrap_err();
        assert_eq!(
            err,
            GridConfigError::ScaleArityMismatch {
                expected: 2,
                got: 1,
            }
        );
    }

    #[test]
    fn derive_rejects_image_arity_mismatch() {
        let err = GridSpec::derive(&[10, 10, 10], &[5, 5], 2, None).unwrap_err();
        assert!(matches!(err, GridConfigError::ImageArityMismatch { .. }));
    }

    #[test]
    fn new_rejects_degenerate_values() {
        assert!(matches!(
            GridSpec::new(&[0, 10], &[5, 5], &[1.0, 1.0]).unwrap_err(),
            GridConfigError::ZeroShape { dim: 0 }
        ));
        assert!(matches!(
            GridSpec::new(&[10, 10], &[5, 0], &[1.0, 1.0]).unwrap_err(),
            GridConfigError::ZeroChunksize { dim: 1 }
        ));
        assert!(matches!(
            GridSpec::new(&[10, 10], &[5, 5], &[1.0, -2.0]).unwrap_err(),
            GridConfigError::NonPositiveScale { dim: 1, .. }
        ));
        assert!(matches!(
            GridSpec::new(&[10, 10], &[5, 5], &[1.0, f64::NAN]).unwrap_err(),
            GridConfigError::NonPositiveScale { dim: 1, .. }
        ));
    }

    #[test]
    fn cell_bounds_apply_scale() {
        let grid = reference_grid();
        // 500 pixels * 16 units/pixel = 8000 units per cell.
        assert_eq!(grid.cell_bounds(&[0, 0]), vec![(0.0, 8000.0), (0.0, 8000.0)]);
        assert_eq!(
            grid.cell_bounds(&[2, 1]),
            vec![(16000.0, 24000.0), (8000.0, 16000.0)]
        );
    }

    #[test]
    fn cell_bounds_of_distinct_cells_are_disjoint() {
        let grid = reference_grid();
        let cells: Vec<_> = grid.cells().collect();
        for a in &cells {
            for b in &cells {
                if a == b {
                    continue;
                }
                let ba = grid.cell_bounds(a);
                let bb = grid.cell_bounds(b);
                // Half-open intervals overlap on every axis only for the
                // same cell.
                let overlaps_everywhere = ba
                    .iter()
                    .zip(&bb)
                    .all(|((lo_a, hi_a), (lo_b, hi_b))| lo_a < hi_b && lo_b < hi_a);
                assert!(!overlaps_everywhere, "cells {a:?} and {b:?} overlap");
            }
        }
    }

    #[test]
    fn cells_cover_the_grid_exactly_once() {
        let grid = GridSpec::new(&[10, 9], &[5, 3], &[1.0, 1.0]).unwrap();
        let cells: Vec<_> = grid.cells().collect();
        assert_eq!(cells.len(), 6);
        assert_eq!(cells[0], vec![0, 0]);
        assert_eq!(cells[1], vec![0, 1]);
        assert_eq!(cells.last().unwrap(), &vec![1, 2]);
        let mut unique = cells.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), cells.len());
    }

    #[test]
    fn covering_single_cell() {
        let grid = reference_grid();
        let cells: Vec<_> = grid
            .covering(&[(0..250).into(), (600..900).into()])
            .collect();
        assert_eq!(cells, vec![vec![0, 1]]);
    }

    #[test]
    fn covering_spans_adjacent_cells() {
        let grid = reference_grid();
        let cells: Vec<_> = grid
            .covering(&[(400..600).into(), (0..500).into()])
            .collect();
        assert_eq!(cells, vec![vec![0, 0], vec![1, 0]]);
    }

    #[test]
    fn covering_defaults_to_full_grid() {
        let grid = reference_grid();
        let all: Vec<_> = grid.cells().collect();
        let covered: Vec<_> = grid
            .covering(&[DimRange::full(), DimRange::full()])
            .collect();
        assert_eq!(covered, all);
    }

    #[test]
    fn covering_boundary_stop_excludes_next_cell() {
        let grid = reference_grid();
        // stop = 500 is the first pixel of cell 1; the half-open range
        // ends before it and ceil(500 / 500) = 1 keeps the cover at cell 0.
        let cells: Vec<_> = grid
            .covering(&[(0..500).into(), (0..500).into()])
            .collect();
        assert_eq!(cells, vec![vec![0, 0]]);
    }

    #[test]
    fn covering_boundary_aligned_empty_range_yields_no_cells() {
        let grid = reference_grid();
        // floor(500 / 500) = ceil(500 / 500) = 1: an empty cell interval.
        for empty in [(0..0).into(), (500..500).into()] {
            let cells: Vec<_> = grid.covering(&[empty, DimRange::full()]).collect();
            assert!(cells.is_empty());
        }
    }

    #[test]
    fn covering_degenerate_range_inside_a_chunk_keeps_its_cell() {
        let grid = reference_grid();
        // 100..100 holds no pixels, but coverage is chunk-granular:
        // floor(100 / 500) = 0 and ceil(100 / 500) = 1 still span cell 0.
        let cells: Vec<_> = grid
            .covering(&[(100..100).into(), (0..1).into()])
            .collect();
        assert_eq!(cells, vec![vec![0, 0]]);
    }

    #[test]
    fn covering_is_not_clamped_to_the_grid() {
        let grid = reference_grid();
        let cells: Vec<_> = grid
            .covering(&[(2400..2500).into(), (0..1).into()])
            .collect();
        // Cell index 4 is the last written cell; index range reaches it only.
        assert_eq!(cells, vec![vec![4, 0]]);
        let beyond: Vec<_> = grid
            .covering(&[(2500..3000).into(), (0..1).into()])
            .collect();
        assert_eq!(beyond, vec![vec![5, 0]]);
    }
}
