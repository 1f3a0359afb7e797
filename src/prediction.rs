//! Component B: Prediction Merger (§4.B).
//!
//! Merges the `T` per-tree leaf-attached mode lists for a keypoint into a
//! single bounded prediction of at most `K` modes via greedy radius-based
//! clustering.

use crate::dispatch::{par_map_to_vec, Dispatch};
use crate::forest::evaluator::LeafIndices;
use crate::forest::mode::{merge_modes, Mode};
use crate::forest::Forest;
use crate::keypoint::Image;

/// An ordered, bounded list of at most `K` modal clusters for one keypoint
/// (§3). A prediction with zero modes marks its keypoint unusable.
#[derive(Debug, Clone, Default)]
pub struct ScorePrediction {
    modes: Vec<Mode>,
}

impl ScorePrediction {
    pub fn modes(&self) -> &[Mode] {
        &self.modes
    }

    pub fn is_usable(&self) -> bool {
        !self.modes.is_empty()
    }

    pub fn total_n(&self) -> u32 {
        self.modes.iter().map(|m| m.n).sum()
    }
}

/// Greedy radius-based clustering (§4.B): sort candidate modes by `n`
/// descending, then for each either merge into the nearest existing output
/// mode within `r_merge`, append as a new output mode (if under the `K`
/// cap), or discard. `leaf_lists` holds one slice of modes per tree, already
/// capped at `K_in` each; the combined candidate pool is additionally capped
/// at `leaf_lists.len() * k_in` per §4.B step 0.
pub fn merge_leaf_predictions(
    leaf_lists: &[&[Mode]],
    k: usize,
    k_in: usize,
    r_merge: f64,
) -> ScorePrediction {
    let cap = leaf_lists.len().max(1) * k_in;
    let mut candidates: Vec<Mode> = leaf_lists.iter().flat_map(|l| l.iter().cloned()).collect();
    candidates.sort_by(|a, b| b.n.cmp(&a.n));
    candidates.truncate(cap);

    let mut output: Vec<Mode> = Vec::with_capacity(k);
    for m in candidates {
        let nearest = output
            .iter()
            .enumerate()
            .map(|(i, o)| (i, (o.mean - m.mean).norm()))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

        match nearest {
            Some((idx, dist)) if dist <= r_merge => {
                output[idx] = merge_modes(&output[idx], &m);
            }
            _ if output.len() < k => output.push(m),
            _ => {}
        }
    }

    // a merge can lift a trailing mode's count past an earlier one's, so the
    // `n`-descending order (§3) has to be restored after clustering, not just
    // assumed from insertion order.
    output.sort_by(|a, b| b.n.cmp(&a.n));
    ScorePrediction { modes: output }
}

/// Drives component B over every keypoint in a frame: merges each pixel's
/// per-tree leaf mode lists into a [`ScorePrediction`]. Parallel over
/// keypoints (§4.B).
pub fn merge_predictions_image(
    forest: &Forest,
    leaf_indices: &Image<LeafIndices>,
    k: usize,
    k_in: usize,
    r_merge: f64,
    dispatch: &dyn Dispatch,
) -> Image<ScorePrediction> {
    let width = leaf_indices.width;
    let height = leaf_indices.height;

    let predictions = par_map_to_vec(dispatch, leaf_indices.len(), &|i| {
        let leaves = leaf_indices.at(i);
        let leaf_lists: Vec<&[Mode]> = forest
            .trees
            .iter()
            .zip(leaves.iter())
            .map(|(tree, &leaf)| tree.leaf_modes(leaf))
            .collect();
        merge_leaf_predictions(&leaf_lists, k, k_in, r_merge)
    });

    Image::from_vec(width, height, predictions)
}
