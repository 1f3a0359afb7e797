//! Component D: Inlier Sampler (§4.D).
//!
//! Grows the shared inlier set by drawing random raster indices, guarded by
//! validity, prediction usability, and (once masked mode is engaged) a
//! companion `W×H` bitmask that prevents resampling (§3).

use rand::Rng;

use crate::keypoint::{Image, KeypointsImage};
use crate::prediction::ScorePrediction;

/// The growing, per-frame set of keypoint raster indices used to score and
/// refine candidates, plus its companion mask (§3).
#[derive(Debug, Clone)]
pub struct InlierSet {
    pub indices: Vec<usize>,
    mask: Vec<bool>,
}

impl InlierSet {
    pub fn new(width: usize, height: usize) -> Self {
        InlierSet {
            indices: Vec::new(),
            mask: vec![false; width * height],
        }
    }

    /// Whether a raster index has ever been accepted into the inlier set.
    pub fn is_marked(&self, raster_index: usize) -> bool {
        self.mask[raster_index]
    }

    /// Draw up to `batch` new inlier indices (§4.D). Per draw: pick a
    /// uniformly random raster index; accept iff the keypoint is valid, its
    /// prediction is usable, and the mask bit at that index is still 0. On
    /// accept, set the mask bit and append.
    ///
    /// Pass `masked = false` for the first call per frame and `masked =
    /// true` for every subsequent call, per §4.D's un-masked/masked split;
    /// since the mask starts all-zero, the mask check is applied
    /// unconditionally here (it is a no-op for the first call) so that a
    /// single raster index is never pushed twice within one pass, not just
    /// across passes.
    pub fn grow(
        &mut self,
        keypoints: &KeypointsImage,
        predictions: &Image<ScorePrediction>,
        batch: usize,
        masked: bool,
        rng: &mut impl Rng,
    ) {
        let _ = masked;
        let total = self.mask.len();
        if total == 0 {
            return;
        }
        for _ in 0..batch {
            let idx = rng.gen_range(0..total);
            if self.mask[idx] {
                continue;
            }
            if !keypoints.at(idx).valid {
                continue;
            }
            if !predictions.at(idx).is_usable() {
                continue;
            }
            self.mask[idx] = true;
            self.indices.push(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypoint::Keypoint;
    use crate::prediction::merge_leaf_predictions;
    use nalgebra::Vector3;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn scene(width: usize) -> (KeypointsImage, Image<ScorePrediction>) {
        let mut keypoints = KeypointsImage::new(width, 1, Keypoint::invalid());
        let mut predictions = Image::new(width, 1, ScorePrediction::default());
        for i in 0..width {
            keypoints.set(i, 0, Keypoint::new(Vector3::new(i as f64, 0.0, 1.0), [0, 0, 0]));
        }
        // leave index 0 unusable (no modes); the rest usable.
        for i in 1..width {
            let mode = crate::forest::mode::Mode {
                mean: Vector3::zeros(),
                inv_cov: nalgebra::Matrix3::identity(),
                log_det_cov: 0.0,
                n: 1,
                colour_mean: None,
            };
            *predictions.at_mut(i) = merge_leaf_predictions(&[&[mode]], 10, 50, 0.005);
        }
        (keypoints, predictions)
    }

    #[test]
    fn masked_draws_never_return_a_marked_index() {
        let (keypoints, predictions) = scene(100);
        let mut inliers = InlierSet::new(100, 1);
        let mut rng = ChaCha20Rng::seed_from_u64(7);

        inliers.grow(&keypoints, &predictions, 40, false, &mut rng);
        let first_round: Vec<usize> = inliers.indices.clone();

        inliers.grow(&keypoints, &predictions, 40, true, &mut rng);
        let mut seen = std::collections::HashSet::new();
        for &idx in &inliers.indices {
            assert!(seen.insert(idx), "index {idx} appeared twice across masked rounds");
        }
        for idx in first_round {
            assert!(inliers.is_marked(idx));
        }
    }

    #[test]
    fn unusable_index_zero_is_never_accepted() {
        let (keypoints, predictions) = scene(20);
        let mut inliers = InlierSet::new(20, 1);
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        for _ in 0..20 {
            inliers.grow(&keypoints, &predictions, 50, true, &mut rng);
        }
        assert!(!inliers.indices.contains(&0));
    }
}
