//! Querying a chunk-file dataset by image region.
//!
//! A [`FollowTableReader`] loads and validates the metadata document once at
//! construction and holds it immutably for its lifetime. Each
//! [`query`](FollowTableReader::query) maps the requested per-dimension
//! pixel ranges to the covering cell set, loads those chunk files, and
//! returns their concatenation. Nothing is cached between queries; readers
//! are independent and may run concurrently against the same dataset.

use std::path::PathBuf;

use polars::prelude::*;
use snafu::prelude::*;

use crate::grid::{DimRange, GridSpec};
use crate::layout;
use crate::metadata::{GridMeta, MetaError};
use crate::storage::{self, StorageError, TableLocation};

/// Errors while constructing a [`FollowTableReader`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum OpenError {
    /// No metadata document exists at the dataset root.
    #[snafu(display("no grid metadata found: {source}"))]
    MetadataMissing {
        /// Underlying storage error for the missing document.
        source: StorageError,
    },

    /// The metadata document exists but could not be read.
    #[snafu(display("failed to read grid metadata: {source}"))]
    MetadataRead {
        /// Underlying storage error.
        source: StorageError,
    },

    /// The metadata document is not valid JSON or misses required fields.
    #[snafu(display("grid metadata is malformed: {source}"))]
    MetadataDecode {
        /// Underlying JSON decoding error.
        source: serde_json::Error,
    },

    /// The metadata document decoded but describes an inconsistent grid.
    #[snafu(display("grid metadata failed validation: {source}"))]
    MetadataInvalid {
        /// Underlying validation error.
        source: MetaError,
    },
}

/// Errors from [`FollowTableReader::query`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueryError {
    /// The query does not have one range per image dimension.
    #[snafu(display(
        "query has {got} ranges but the followed image has {expected} dimensions"
    ))]
    ShapeMismatch {
        /// Dimensionality of the followed image.
        expected: usize,
        /// Number of ranges supplied.
        got: usize,
    },

    /// A covered cell has no chunk file, for example because the query
    /// reaches past the written grid.
    #[snafu(display("no chunk file for cell {cell:?} at {path}"))]
    MissingChunk {
        /// Index tuple of the cell without a file.
        cell: Vec<u64>,
        /// The path that was expected to exist.
        path: String,
        /// Underlying storage error.
        source: StorageError,
    },

    /// Filesystem failure while reading a chunk file.
    #[snafu(display("storage error while reading chunks: {source}"))]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// The table engine failed while parsing or concatenating chunks.
    #[snafu(display("table engine error: {source}"))]
    Table {
        /// Underlying polars error.
        source: PolarsError,
    },
}

/// Read access to one chunk-file dataset.
#[derive(Debug)]
pub struct FollowTableReader {
    location: TableLocation,
    meta: GridMeta,
    grid: GridSpec,
}

impl FollowTableReader {
    /// Open the dataset rooted at `root`.
    ///
    /// Reads and validates `meta.json` exactly once; the metadata is
    /// immutable for the reader's lifetime and never re-read per query.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, OpenError> {
        let location = TableLocation::local(root);
        let raw = match storage::read_to_string(&location, &layout::meta_rel_path()) {
            Ok(raw) => raw,
            Err(source @ StorageError::NotFound { .. }) => {
                return Err(OpenError::MetadataMissing { source });
            }
            Err(source) => return Err(OpenError::MetadataRead { source }),
        };
        let meta: GridMeta = serde_json::from_str(&raw).context(MetadataDecodeSnafu)?;
        let grid = meta.validate().context(MetadataInvalidSnafu)?;
        Ok(FollowTableReader {
            location,
            meta,
            grid,
        })
    }

    /// The validated metadata document this reader was constructed from.
    pub fn meta(&self) -> &GridMeta {
        &self.meta
    }

    /// The grid parameters derived from the metadata.
    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Return the concatenation of all rows stored in cells covered by the
    /// given region.
    ///
    /// `ranges` must contain one half-open pixel interval per *image*
    /// dimension, in the image's dimension order; dimensions beyond the
    /// followed ones are validated for arity but do not participate in cell
    /// selection. Missing bounds default to the full extent.
    ///
    /// Row order within the result is unspecified beyond each cell's
    /// internal sort by its chunk columns. Cell selection is
    /// chunk-granular: a degenerate range inside a chunk still selects the
    /// containing cell, and only a range starting and ending on the same
    /// chunk boundary covers no cells and yields an empty frame.
    ///
    /// # Errors
    ///
    /// Fails with [`QueryError::ShapeMismatch`] on arity mismatch rather
    /// than silently truncating the query, and with
    /// [`QueryError::MissingChunk`] when a covered cell has no file (for
    /// example, a range reaching past the written grid).
    pub fn query(&self, ranges: &[DimRange]) -> Result<DataFrame, QueryError> {
        ensure!(
            ranges.len() == self.meta.image_shape.len(),
            ShapeMismatchSnafu {
                expected: self.meta.image_shape.len(),
                got: ranges.len(),
            }
        );

        let followed = &ranges[..self.grid.follow_dims()];
        let mut result: Option<DataFrame> = None;
        for cell in self.grid.covering(followed) {
            let rel = layout::chunk_rel_path(&cell);
            let file = match storage::open_file(&self.location, &rel) {
                Ok(file) => file,
                Err(source @ StorageError::NotFound { .. }) => {
                    return Err(QueryError::MissingChunk {
                        path: self.location.join(&rel).display().to_string(),
                        cell,
                        source,
                    });
                }
                Err(source) => return Err(QueryError::Storage { source }),
            };
            let chunk = CsvReadOptions::default()
                .with_has_header(true)
                .into_reader_with_file_handle(file)
                .finish()
                .context(TableSnafu)?;
            // Empty cells carry no schema information worth unifying.
            if chunk.height() == 0 {
                continue;
            }
            result = Some(match result {
                None => chunk,
                Some(acc) => acc.vstack(&chunk).context(TableSnafu)?,
            });
        }

        Ok(result.unwrap_or_else(DataFrame::empty))
    }

    /// Convenience for querying the full extent of every dimension.
    pub fn query_all(&self) -> Result<DataFrame, QueryError> {
        let ranges = vec![DimRange::full(); self.meta.image_shape.len()];
        self.query(&ranges)
    }
}
