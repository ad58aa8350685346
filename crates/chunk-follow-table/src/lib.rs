//! Storage for point-record tables that follow the chunk grid of an image.
//!
//! A table of spatial point records (for example, localization microscopy
//! events with `x`/`y` coordinates) is partitioned into one CSV file per
//! chunk of an associated N-dimensional image, so that a spatial sub-region
//! of the image can be matched to the table rows falling inside it without
//! scanning the whole table.
//!
//! The crate provides:
//!
//! - Pure chunk-grid math mapping coordinate-space regions to cell index
//!   tuples and back, shared by the writer and the reader (`grid` module).
//! - A validated metadata document (`meta.json`) describing the grid
//!   (`metadata` module).
//! - A writer that partitions an in-memory [`polars`] `DataFrame` into
//!   per-cell files (`writer` module).
//! - A reader that resolves a per-dimension pixel range to the covering
//!   cell set and returns the concatenation of those cells
//!   (`reader` module).
//!
//! The writer runs once to produce storage; readers run per query against
//! that storage. There is no shared process state, no locking, and no
//! versioning: a writer must fully complete before readers target the
//! dataset.
#![deny(missing_docs)]
pub mod grid;
pub mod layout;
pub mod metadata;
pub mod reader;
pub mod storage;
pub mod writer;

pub use grid::{DimRange, GridConfigError, GridSpec};
pub use metadata::{GridMeta, MetaError};
pub use reader::{FollowTableReader, OpenError, QueryError};
pub use storage::TableLocation;
pub use writer::{WriteError, WriteReport, write_table};
