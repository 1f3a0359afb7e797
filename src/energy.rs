//! Component E: Energy Scorer (§4.E).
//!
//! For a candidate pose and the current inlier set, accumulates a
//! Mahalanobis-style mixture negative-log-likelihood energy, using a
//! log-sum-exp reduction so the mixture density never needs to be computed
//! in linear space (avoiding underflow for confident, tightly-peaked modes).

use nalgebra::Vector3;

use crate::candidate::PoseCandidate;
use crate::dispatch::Dispatch;
use crate::keypoint::{Image, KeypointsImage};
use crate::prediction::ScorePrediction;

/// `c_i = −log( Σ_k (n_k / N) · 𝒩(y; μ_k, Σ_k) )` for one keypoint's merged
/// prediction (§4.E). Returns `+inf` for an unusable (zero-mode) prediction.
pub fn mixture_neg_log_density(prediction: &ScorePrediction, y: &Vector3<f64>) -> f64 {
    let modes = prediction.modes();
    let total_n: f64 = modes.iter().map(|m| m.n as f64).sum();
    if modes.is_empty() || total_n <= 0.0 {
        return f64::INFINITY;
    }

    let log_terms: Vec<f64> = modes
        .iter()
        .map(|m| (m.n as f64 / total_n).ln() + m.log_density(y))
        .collect();
    let max_term = log_terms.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max_term.is_finite() {
        return f64::INFINITY;
    }
    let sum_exp: f64 = log_terms.iter().map(|t| (t - max_term).exp()).sum();
    -(max_term + sum_exp.ln())
}

/// The candidate's energy: the mean per-inlier cost over `inliers` (§4.E).
/// Parallel reduction via the dispatch's atomic accumulator.
pub fn score_candidate(
    candidate: &PoseCandidate,
    keypoints: &KeypointsImage,
    predictions: &Image<ScorePrediction>,
    inliers: &[usize],
    dispatch: &dyn Dispatch,
) -> f64 {
    if inliers.is_empty() {
        return 0.0;
    }
    let total = dispatch.map_sum(inliers.len(), &|j| {
        let idx = inliers[j];
        let y = candidate.pose.apply(&keypoints.at(idx).x_cam);
        mixture_neg_log_density(predictions.at(idx), &y)
    });
    total / inliers.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Correspondence;
    use crate::dispatch::SequentialDispatch;
    use crate::forest::mode::Mode;
    use crate::keypoint::Keypoint;
    use crate::pose::Pose;
    use crate::prediction::merge_leaf_predictions;
    use nalgebra::Matrix3;

    fn unit_mode(mean: Vector3<f64>) -> Mode {
        Mode {
            mean,
            inv_cov: Matrix3::identity(),
            log_det_cov: 0.0,
            n: 1,
            colour_mean: None,
        }
    }

    fn stub_candidate(pose: Pose) -> PoseCandidate {
        let corr = Correspondence {
            keypoint_index: 0,
            mode_index: 0,
            x_cam: Vector3::zeros(),
            mu: Vector3::zeros(),
        };
        PoseCandidate {
            pose,
            correspondences: [corr.clone(), corr.clone(), corr],
            energy: f64::INFINITY,
            in_use: true,
        }
    }

    #[test]
    fn lower_energy_for_better_aligned_pose() {
        let mut keypoints = KeypointsImage::new(1, 1, Keypoint::invalid());
        keypoints.set(0, 0, Keypoint::new(Vector3::new(0.0, 0.0, 1.0), [0, 0, 0]));

        let mut predictions = Image::new(1, 1, ScorePrediction::default());
        *predictions.at_mut(0) = merge_leaf_predictions(
            &[&[unit_mode(Vector3::new(2.0, 3.0, 4.0))]],
            10,
            50,
            0.005,
        );

        let good = stub_candidate(Pose::new(
            nalgebra::Rotation3::identity(),
            Vector3::new(2.0, 3.0, 4.0),
        ));
        let bad = stub_candidate(Pose::new(
            nalgebra::Rotation3::identity(),
            Vector3::new(20.0, 30.0, 40.0),
        ));

        let e_good = score_candidate(&good, &keypoints, &predictions, &[0], &SequentialDispatch);
        let e_bad = score_candidate(&bad, &keypoints, &predictions, &[0], &SequentialDispatch);
        assert!(e_good < e_bad);
    }

    #[test]
    fn empty_inlier_set_scores_zero() {
        let keypoints = KeypointsImage::new(1, 1, Keypoint::invalid());
        let predictions = Image::new(1, 1, ScorePrediction::default());
        let candidate = stub_candidate(Pose::identity());
        assert_eq!(
            score_candidate(&candidate, &keypoints, &predictions, &[], &SequentialDispatch),
            0.0
        );
    }
}
