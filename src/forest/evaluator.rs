//! Component A: Forest Evaluator (§4.A).
//!
//! For each descriptor, walk every tree from root to leaf and record the
//! leaf index reached. Parallel over pixels; each pixel is independent, so
//! this dispatches through the generic [`crate::dispatch::Dispatch`] trait
//! rather than hard-coding rayon, mirroring the teacher's `par_iter`/`iter`
//! split in `src/rcf.rs` generalised per `spec.md` §9.

use crate::dispatch::{par_map_to_vec, Dispatch};
use crate::keypoint::{DescriptorsImage, Image};

use super::io::Forest;

/// Per-pixel leaf index vector: `T` leaf identifiers, one per tree.
pub type LeafIndices = Vec<u32>;

impl Forest {
    /// Descend every tree for every descriptor (§4.A). Output has the same
    /// raster shape as `descriptors`; pixels with an empty descriptor vector
    /// are not expected (the caller's `ShapeMismatch` check happens earlier).
    pub fn evaluate(
        &self,
        descriptors: &DescriptorsImage,
        dispatch: &dyn Dispatch,
    ) -> Image<LeafIndices> {
        let leaves = par_map_to_vec(dispatch, descriptors.len(), &|i| {
            let descriptor = descriptors.at(i);
            self.trees.iter().map(|t| t.descend(descriptor)).collect()
        });
        Image::from_vec(descriptors.width, descriptors.height, leaves)
    }
}
