//! Partitioning a table into per-cell chunk files.
//!
//! [`write_table`] runs once per dataset: it derives the grid, persists
//! `meta.json`, and then writes one CSV file for every cell of the full
//! grid, empty cells included. Each cell receives exactly the rows whose
//! chunk-column values fall inside the cell's half-open coordinate bounds,
//! sorted ascending by the chunk columns. Rows outside the followed
//! coordinate range belong to no cell; they are dropped from the output,
//! counted, and reported in the [`WriteReport`] instead of vanishing
//! silently.
//!
//! There is no rollback: a failed run leaves a partially written dataset.
//! Individual files are still published atomically (write-then-rename), so
//! no file is ever observable in a truncated state.

use std::path::PathBuf;

use log::{debug, info, warn};
use polars::prelude::*;
use snafu::prelude::*;

use crate::grid::{GridConfigError, GridSpec};
use crate::layout;
use crate::metadata::GridMeta;
use crate::storage::{self, StorageError, TableLocation};

/// Name of the row-index column added to every serialized chunk file.
///
/// The values are the row positions of the input table, so rows stay
/// traceable to their origin after partitioning and concatenation.
pub const ROW_INDEX_COLUMN: &str = "index";

/// Errors from [`write_table`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum WriteError {
    /// The grid configuration arguments are invalid.
    #[snafu(transparent)]
    Config {
        /// Underlying grid configuration error.
        source: GridConfigError,
    },

    /// A chunk column named in the configuration is absent from the table.
    #[snafu(display("table has no column {column:?} to partition by"))]
    MissingChunkColumn {
        /// The missing column name.
        column: String,
    },

    /// The metadata document could not be encoded as JSON.
    #[snafu(display("failed to encode grid metadata: {source}"))]
    MetaEncode {
        /// Underlying JSON encoding error.
        source: serde_json::Error,
    },

    /// Filesystem failure while publishing the metadata or a chunk file.
    #[snafu(display("storage error while writing dataset: {source}"))]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// The table engine failed while filtering, sorting, or serializing.
    #[snafu(display("table engine error: {source}"))]
    Table {
        /// Underlying polars error.
        source: PolarsError,
    },
}

/// Outcome of a completed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    /// Number of chunk files written (the full grid, empty cells included).
    pub cells_written: u64,
    /// Number of input rows that landed in some cell.
    pub rows_written: usize,
    /// Number of input rows outside the followed coordinate range, claimed
    /// by no cell and therefore absent from the output.
    pub rows_dropped: usize,
}

/// Partition `table` into a chunk-file dataset rooted at `root`.
///
/// The grid mirrors the chunk grid of the associated image: `image_shape`
/// and `image_chunksize` describe the image, `chunk_columns` names the table
/// columns that follow its leading dimensions, and `chunk_scale` (defaulting
/// to all-ones) converts a cell's pixel extent into those columns' units.
///
/// Writes `meta.json` plus one CSV file per grid cell and returns a
/// [`WriteReport`]. The cell iteration order is an implementation detail:
/// cells are independent and idempotent to write in any order.
///
/// # Errors
///
/// Invalid configuration (more chunk columns than image dimensions, scale
/// arity mismatch, missing columns) fails before anything is written.
/// Storage and table-engine failures propagate and may leave a partially
/// written dataset behind.
pub fn write_table(
    root: impl Into<PathBuf>,
    table: &DataFrame,
    image_shape: &[u64],
    image_chunksize: &[u64],
    chunk_columns: &[&str],
    chunk_scale: Option<&[f64]>,
) -> Result<WriteReport, WriteError> {
    let grid = GridSpec::derive(image_shape, image_chunksize, chunk_columns.len(), chunk_scale)?;
    for column in chunk_columns {
        ensure!(
            table
                .get_column_names()
                .iter()
                .any(|name| name.as_str() == *column),
            MissingChunkColumnSnafu { column: *column }
        );
    }

    let location = TableLocation::local(root);
    let meta = GridMeta::from_grid(image_shape, image_chunksize, &grid);
    let meta_bytes = serde_json::to_vec_pretty(&meta).context(MetaEncodeSnafu)?;
    storage::write_atomic(&location, &layout::meta_rel_path(), &meta_bytes)
        .context(StorageSnafu)?;

    let indexed = table
        .with_row_index(ROW_INDEX_COLUMN.into(), None)
        .context(TableSnafu)?;
    let total_rows = indexed.height();
    let sort_columns: Vec<PlSmallStr> = chunk_columns.iter().map(|c| PlSmallStr::from(*c)).collect();

    let mut rows_written = 0usize;
    let mut cells_written = 0u64;
    for cell in grid.cells() {
        let bounds = grid.cell_bounds(&cell);

        // Conjunction of half-open interval predicates, one per chunk column.
        let mut predicate = lit(true);
        for (column, &(lower, upper)) in chunk_columns.iter().zip(&bounds) {
            predicate = predicate
                .and(col(*column).gt_eq(lit(lower)))
                .and(col(*column).lt(lit(upper)));
        }

        let mut subset = indexed
            .clone()
            .lazy()
            .filter(predicate)
            .sort(
                sort_columns.clone(),
                SortMultipleOptions::default().with_maintain_order(true),
            )
            .collect()
            .context(TableSnafu)?;

        debug!(
            "writing cell {cell:?} ({rows} rows, bounds {bounds:?})",
            rows = subset.height()
        );

        let mut buffer = Vec::new();
        CsvWriter::new(&mut buffer)
            .include_header(true)
            .finish(&mut subset)
            .context(TableSnafu)?;
        storage::write_atomic(&location, &layout::chunk_rel_path(&cell), &buffer)
            .context(StorageSnafu)?;

        rows_written += subset.height();
        cells_written += 1;
    }

    // Cells are disjoint, so anything unaccounted for fell outside the
    // followed coordinate range.
    let rows_dropped = total_rows - rows_written;
    if rows_dropped > 0 {
        warn!("{rows_dropped} of {total_rows} rows fall outside the followed range and were dropped");
    }
    info!("wrote {cells_written} chunk files ({rows_written} rows)");

    Ok(WriteReport {
        cells_written,
        rows_written,
        rows_dropped,
    })
}
