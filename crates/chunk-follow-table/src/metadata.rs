//! The grid metadata document persisted as `meta.json`.
//!
//! One [`GridMeta`] is written per dataset at creation time and is immutable
//! afterwards. It is the single source of truth consulted by both the writer
//! (cell boundaries) and the reader (covering-cell computation); chunk files
//! are addressed purely by integer coordinates derived from it.
//!
//! The document is deliberately a flat JSON object of numeric arrays. The
//! chunk column *names* are not persisted: the reader concatenates whole
//! files and never interprets individual columns, so the numeric grid
//! parameters are sufficient on the read side.

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::grid::{GridConfigError, GridSpec};

/// Errors found while validating a decoded metadata document.
#[derive(Debug, Snafu)]
pub enum MetaError {
    /// A grid parameter in the document is structurally invalid.
    #[snafu(transparent)]
    Grid {
        /// Underlying grid configuration error.
        source: GridConfigError,
    },

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

    /// The followed dimensions outnumber the image dimensions.
    #[snafu(display(
        "document follows {follow_dims} dimensions of a {image_dims}-dimensional image"
    ))]
    FollowWiderThanImage {
        /// Number of followed dimensions recorded.
        follow_dims: usize,
        /// Dimensionality of the image recorded.
        image_dims: usize,
    },

    /// `follow_chunks` does not have one entry per followed dimension.
    #[snafu(display("follow_chunks has {got} entries, expected {expected}"))]
    ChunkCountArity {
        /// Number of followed dimensions.
        expected: usize,
        /// Number of `follow_chunks` entries found.
        got: usize,
    },

    /// A stored `follow_chunks` entry disagrees with the value recomputed
    /// from `follow_shape` and `follow_chunksize`.
    #[snafu(display(
        "follow_chunks[{dim}] is {stored} but ceil(follow_shape / follow_chunksize) is {computed}"
    ))]
    ChunkCountMismatch {
        /// The inconsistent dimension.
        dim: usize,
        /// The value stored in the document.
        stored: u64,
        /// The value recomputed from shape and chunk size.
        computed: u64,
    },
}

/// Grid metadata persisted once per dataset.
///
/// Field names and layout match the on-disk `meta.json` contract exactly;
/// see the module documentation for why chunk column names are absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridMeta {
    /// Full extent of the followed image, one entry per image dimension.
    pub image_shape: Vec<u64>,
    /// Size of one image chunk, one entry per image dimension.
    pub image_chunksize: Vec<u64>,
    /// Grid extent in cells per followed dimension.
    pub follow_chunks: Vec<u64>,
    /// `image_shape` truncated to the followed dimensions.
    pub follow_shape: Vec<u64>,
    /// `image_chunksize` truncated to the followed dimensions.
    pub follow_chunksize: Vec<u64>,
    /// Pixel-to-column-unit scale per followed dimension.
    pub chunk_scale: Vec<f64>,
}

impl GridMeta {
    /// Build the document for a freshly derived grid.
    pub fn from_grid(image_shape: &[u64], image_chunksize: &[u64], grid: &GridSpec) -> Self {
        GridMeta {
            image_shape: image_shape.to_vec(),
            image_chunksize: image_chunksize.to_vec(),
            follow_chunks: grid.follow_chunks().to_vec(),
            follow_shape: grid.follow_shape().to_vec(),
            follow_chunksize: grid.follow_chunksize().to_vec(),
            chunk_scale: grid.chunk_scale().to_vec(),
        }
    }

    /// Validate the document and rebuild the [`GridSpec`] it describes.
    ///
    /// Malformed documents are rejected here, at load time, instead of
    /// failing deep inside grid arithmetic: arities must line up, all values
    /// must be positive, and the stored `follow_chunks` must equal the
    /// recomputed ceiling division.
    pub fn validate(&self) -> Result<GridSpec, MetaError> {
        ensure!(
            self.image_shape.len() == self.image_chunksize.len(),
            ImageArityMismatchSnafu {
                shape_len: self.image_shape.len(),
                chunksize_len: self.image_chunksize.len(),
            }
        );
        ensure!(
            self.follow_shape.len() <= self.image_shape.len(),
            FollowWiderThanImageSnafu {
                follow_dims: self.follow_shape.len(),
                image_dims: self.image_shape.len(),
            }
        );

        let grid = GridSpec::new(&self.follow_shape, &self.follow_chunksize, &self.chunk_scale)?;

        ensure!(
            self.follow_chunks.len() == grid.follow_chunks().len(),
            ChunkCountAritySnafu {
                expected: grid.follow_chunks().len(),
                got: self.follow_chunks.len(),
            }
        );
        for (dim, (&stored, &computed)) in self
            .follow_chunks
            .iter()
            .zip(grid.follow_chunks())
            .enumerate()
        {
            ensure!(
                stored == computed,
                ChunkCountMismatchSnafu {
                    dim,
                    stored,
                    computed,
                }
            );
        }

        Ok(grid)
    }
}
