//! On-disk layout conventions for a dataset root.
//!
//! This module centralizes all *relative* path conventions under a dataset
//! root: the metadata document name and the nested directory/file naming of
//! chunk files. The functions here return relative [`std::path::PathBuf`]
//! values; callers join them with a dataset root (a
//! [`crate::storage::TableLocation`]) before doing IO.

use std::path::PathBuf;

/// Name of the grid metadata document at the dataset root.
pub const META_FILE_NAME: &str = "meta.json";

/// Extension of chunk data files.
pub const CHUNK_FILE_EXT: &str = "csv";

/// Relative path: `meta.json`
pub fn meta_rel_path() -> PathBuf {
    PathBuf::from(META_FILE_NAME)
}

/// Relative path of the chunk file for one cell index tuple.
///
/// All indices but the last nest as directory names; the last index is the
/// file stem: `(3, 0, 7)` becomes `3/0/7.csv`, `(2,)` becomes `2.csv`.
pub fn chunk_rel_path(cell: &[u64]) -> PathBuf {
    debug_assert!(!cell.is_empty(), "cell index tuple must be non-empty");
    let mut path = PathBuf::new();
    for index in &cell[..cell.len() - 1] {
        path.push(index.to_string());
    }
    if let Some(last) = cell.last() {
        path.push(format!("{last}.{CHUNK_FILE_EXT}"));
    }
    path
}
