//! Components F and G: the Preemptive Loop and Pose Refiner, plus the
//! top-level [`Relocaliser`] that owns per-frame arenas and drives the state
//! machine of §4.H.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, trace, warn};
use nalgebra::Vector3;

use crate::candidate::{generate_candidates, PoseCandidate};
use crate::config::RelocaliserConfig;
use crate::dispatch::{build_dispatch, par_map_to_vec, Dispatch};
use crate::energy::score_candidate;
use crate::errors::{ForestLoadError, RelocFail, ShapeMismatch};
use crate::forest::Forest;
use crate::inlier::InlierSet;
use crate::kabsch::weighted_kabsch;
use crate::keypoint::{DescriptorsImage, Image, KeypointsImage};
use crate::lm::{refine_pose, LmConfig};
use crate::pose::Pose;
use crate::prediction::{merge_predictions_image, ScorePrediction};
use crate::rng::slot_rng;

/// Energy inflation applied to a candidate whose refinement failed this
/// round (§4.G, §7): additive rather than a hard override, so the word
/// "inflated" in the spec stays literal — a candidate that was already
/// scoring poorly is inflated further, not reset to a fixed sentinel.
const REFINEMENT_FAILURE_PENALTY: f64 = 1.0e9;

/// A reserved RNG slot distinct from every candidate-generator slot
/// (`0..m_max`), used to seed the inlier sampler's own stream.
const INLIER_RNG_SLOT: u64 = u64::MAX;

/// Owns the frozen forest and per-frame dispatch backend, and exposes the
/// two external operations of §6: [`Relocaliser::predict`] and
/// [`Relocaliser::relocalise`].
pub struct Relocaliser {
    forest: Forest,
    config: RelocaliserConfig,
    dispatch: Box<dyn Dispatch>,
}

impl Relocaliser {
    pub fn new(forest: Forest, config: RelocaliserConfig) -> Self {
        let dispatch = build_dispatch(config.thread_pool_size);
        Relocaliser {
            forest,
            config,
            dispatch,
        }
    }

    /// Load a forest from `path` (§6 binary format) and build a relocaliser
    /// around it. The only construction-time failure mode (§7).
    pub fn load<P: AsRef<Path>>(path: P, config: RelocaliserConfig) -> Result<Self, ForestLoadError> {
        let file = File::open(path)?;
        let forest = Forest::load(BufReader::new(file))?;
        Ok(Self::new(forest, config))
    }

    pub fn config(&self) -> &RelocaliserConfig {
        &self.config
    }

    /// Component A + B: evaluate the forest over `descriptors` and merge each
    /// keypoint's per-tree leaf modes into a [`ScorePrediction`] (§4.A–§4.B).
    pub fn predict(
        &self,
        keypoints: &KeypointsImage,
        descriptors: &DescriptorsImage,
    ) -> Result<Image<ScorePrediction>, ShapeMismatch> {
        if keypoints.width != descriptors.width || keypoints.height != descriptors.height {
            return Err(ShapeMismatch::KeypointsVsDescriptors {
                kw: keypoints.width,
                kh: keypoints.height,
                dw: descriptors.width,
                dh: descriptors.height,
            });
        }
        if !descriptors.is_empty() {
            let found = descriptors.at(0).len();
            if found != self.forest.feature_count {
                return Err(ShapeMismatch::FeatureCount {
                    found,
                    expected: self.forest.feature_count,
                });
            }
        }

        trace!("state=PREDICT dispatch={}", self.dispatch.name());
        let leaves = self.forest.evaluate(descriptors, self.dispatch.as_ref());
        Ok(merge_predictions_image(
            &self.forest,
            &leaves,
            self.config.k,
            self.config.k_in,
            self.config.r_merge,
            self.dispatch.as_ref(),
        ))
    }

    /// Components C–G: the preemptive RANSAC loop (§4.F), driven through the
    /// strict state machine of §4.H. `cancel` is polled between states only
    /// (§5); it is not observed mid-dispatch.
    pub fn relocalise(
        &self,
        keypoints: &KeypointsImage,
        predictions: &Image<ScorePrediction>,
        cancel: &AtomicBool,
    ) -> Result<Pose, RelocFail> {
        if cancel.load(Ordering::Acquire) {
            return Err(RelocFail::Cancelled);
        }

        trace!("state=GENERATE dispatch={}", self.dispatch.name());
        let mut candidates =
            generate_candidates(keypoints, predictions, &self.config, self.dispatch.as_ref());
        if candidates.is_empty() {
            return Err(RelocFail::EmptyCandidatePool);
        }

        let mut inliers = InlierSet::new(keypoints.width, keypoints.height);
        let mut rng = slot_rng(self.config.rng_seed, INLIER_RNG_SLOT);
        inliers.grow(keypoints, predictions, self.config.b, false, &mut rng);

        let mut round = 0usize;
        while candidates.len() > 1 {
            if cancel.load(Ordering::Acquire) {
                return Err(RelocFail::Cancelled);
            }
            if round >= self.config.max_rounds {
                warn!(
                    "frame budget exhausted after {round} rounds with {} candidates remaining",
                    candidates.len()
                );
                return Err(RelocFail::Timeout);
            }

            trace!("state=SCORE round={round} inliers={}", inliers.indices.len());
            inliers.grow(keypoints, predictions, self.config.b, true, &mut rng);

            let results = par_map_to_vec(self.dispatch.as_ref(), candidates.len(), &|i| {
                let energy = score_candidate(
                    &candidates[i],
                    keypoints,
                    predictions,
                    &inliers.indices,
                    self.dispatch.as_ref(),
                );
                let refined =
                    refine_candidate(&candidates[i], keypoints, predictions, &inliers.indices, &self.config);
                (energy, refined)
            });

            for (candidate, (energy, refined)) in candidates.iter_mut().zip(results) {
                match refined {
                    Some(pose) => {
                        candidate.pose = pose;
                        candidate.energy = energy;
                    }
                    None => {
                        candidate.energy = energy + REFINEMENT_FAILURE_PENALTY;
                    }
                }
            }

            trace!("state=HALVE round={round}");
            candidates.sort_by(|a, b| {
                a.energy
                    .partial_cmp(&b.energy)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let keep = (candidates.len() + 1) / 2;
            candidates.truncate(keep);
            round += 1;
        }

        if candidates.is_empty() {
            return Err(RelocFail::EmptyCandidatePool);
        }

        debug!("state=EMIT success rounds={round}");
        Ok(candidates[0].pose)
    }
}

/// Component G: weighted Kabsch reinitialisation followed by
/// Levenberg-Marquardt refinement over the current inlier set (§4.G).
fn refine_candidate(
    candidate: &PoseCandidate,
    keypoints: &KeypointsImage,
    predictions: &Image<ScorePrediction>,
    inliers: &[usize],
    config: &RelocaliserConfig,
) -> Option<Pose> {
    let assignments = assign_inliers_to_modes(candidate, keypoints, predictions, inliers);
    if assignments.len() < 3 {
        return None;
    }

    let (rotation, translation) = weighted_kabsch(&assignments)?;
    let init_pose = Pose::new(rotation, translation);

    let lm_config = LmConfig {
        max_iters: config.lm_max_iters,
        tol_rel: config.lm_tol_rel,
    };
    refine_pose(init_pose, &assignments, &lm_config)
}

/// Step 1 of §4.G: for each inlier, pick `k* = argmax_k (n_k/N) 𝒩(y; μ_k,
/// Σ_k)` and emit `(x_cam_i, μ_{k*})` weighted by `n_{k*}/N`.
fn assign_inliers_to_modes(
    candidate: &PoseCandidate,
    keypoints: &KeypointsImage,
    predictions: &Image<ScorePrediction>,
    inliers: &[usize],
) -> Vec<(Vector3<f64>, Vector3<f64>, f64)> {
    let mut assignments = Vec::with_capacity(inliers.len());
    for &idx in inliers {
        let prediction = predictions.at(idx);
        let modes = prediction.modes();
        if modes.is_empty() {
            continue;
        }
        let total_n: f64 = modes.iter().map(|m| m.n as f64).sum();
        if total_n <= 0.0 {
            continue;
        }

        let x_cam = keypoints.at(idx).x_cam;
        let y = candidate.pose.apply(&x_cam);

        let mut best_index = 0;
        let mut best_log_score = f64::NEG_INFINITY;
        for (k, m) in modes.iter().enumerate() {
            let weight = m.n as f64 / total_n;
            let log_score = weight.ln() + m.log_density(&y);
            if log_score > best_log_score {
                best_log_score = log_score;
                best_index = k;
            }
        }

        let chosen = &modes[best_index];
        let weight = chosen.n as f64 / total_n;
        assignments.push((x_cam, chosen.mean, weight));
    }
    assignments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypoint::Keypoint;
    use crate::prediction::merge_leaf_predictions;
    use nalgebra::{Matrix3, Rotation3};

    fn forest_stub() -> Forest {
        Forest {
            trees: Vec::new(),
            max_modes_per_leaf: 50,
            feature_count: 4,
        }
    }

    fn scene_with_exact_correspondences(
        n: usize,
        rotation: Rotation3<f64>,
        translation: Vector3<f64>,
    ) -> (KeypointsImage, Image<ScorePrediction>) {
        let mut keypoints = KeypointsImage::new(n, 1, Keypoint::invalid());
        let mut predictions = Image::new(n, 1, ScorePrediction::default());
        for i in 0..n {
            let angle = (i as f64) * 0.7 + 1.0;
            let x_cam = Vector3::new(angle.cos(), angle.sin(), 1.0 + i as f64 * 0.3);
            keypoints.set(i, 0, Keypoint::new(x_cam, [0, 0, 0]));
            let mean = rotation * x_cam + translation;
            let mode = crate::forest::mode::Mode {
                mean,
                inv_cov: Matrix3::identity(),
                log_det_cov: 0.0,
                n: 1,
                colour_mean: None,
            };
            *predictions.at_mut(i) = merge_leaf_predictions(&[&[mode]], 10, 50, 0.005);
        }
        (keypoints, predictions)
    }

    #[test]
    fn identity_transform_is_recovered() {
        let (keypoints, predictions) =
            scene_with_exact_correspondences(12, Rotation3::identity(), Vector3::new(2.0, 3.0, 4.0));
        let mut config = RelocaliserConfig {
            m_max: 64,
            thread_pool_size: 0,
            ..RelocaliserConfig::default()
        };
        config.max_rounds = 8;
        let reloc = Relocaliser::new(forest_stub(), config);
        let cancel = AtomicBool::new(false);

        let pose = reloc.relocalise(&keypoints, &predictions, &cancel).unwrap();
        assert!((pose.rotation.matrix() - Matrix3::identity()).norm() < 1e-4);
        assert!((pose.translation - Vector3::new(2.0, 3.0, 4.0)).norm() < 1e-4);
    }

    #[test]
    fn rotated_transform_is_recovered() {
        let r_true = Rotation3::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_6);
        let (keypoints, predictions) =
            scene_with_exact_correspondences(12, r_true, Vector3::zeros());
        let mut config = RelocaliserConfig {
            m_max: 64,
            thread_pool_size: 0,
            ..RelocaliserConfig::default()
        };
        config.max_rounds = 8;
        let reloc = Relocaliser::new(forest_stub(), config);
        let cancel = AtomicBool::new(false);

        let pose = reloc.relocalise(&keypoints, &predictions, &cancel).unwrap();
        assert!((pose.rotation.matrix() - r_true.matrix()).norm() < 1e-4);
        assert!(pose.translation.norm() < 1e-4);
    }

    #[test]
    fn empty_predictions_fail_with_empty_candidate_pool() {
        let keypoints = KeypointsImage::new(8, 1, Keypoint::invalid());
        let predictions = Image::new(8, 1, ScorePrediction::default());
        let config = RelocaliserConfig {
            m_max: 32,
            generator_retry_budget: 50,
            thread_pool_size: 0,
            ..RelocaliserConfig::default()
        };
        let reloc = Relocaliser::new(forest_stub(), config);
        let cancel = AtomicBool::new(false);

        let err = reloc.relocalise(&keypoints, &predictions, &cancel).unwrap_err();
        assert_eq!(err, RelocFail::EmptyCandidatePool);
    }

    #[test]
    fn two_usable_keypoints_cannot_form_a_triple() {
        let (keypoints, predictions) =
            scene_with_exact_correspondences(2, Rotation3::identity(), Vector3::zeros());
        let config = RelocaliserConfig {
            m_max: 32,
            generator_retry_budget: 50,
            thread_pool_size: 0,
            ..RelocaliserConfig::default()
        };
        let reloc = Relocaliser::new(forest_stub(), config);
        let cancel = AtomicBool::new(false);

        let err = reloc.relocalise(&keypoints, &predictions, &cancel).unwrap_err();
        assert_eq!(err, RelocFail::EmptyCandidatePool);
    }

    #[test]
    fn zero_rounds_times_out() {
        let (keypoints, predictions) =
            scene_with_exact_correspondences(12, Rotation3::identity(), Vector3::new(1.0, 0.0, 0.0));
        let config = RelocaliserConfig {
            m_max: 64,
            max_rounds: 0,
            thread_pool_size: 0,
            ..RelocaliserConfig::default()
        };
        let reloc = Relocaliser::new(forest_stub(), config);
        let cancel = AtomicBool::new(false);

        let err = reloc.relocalise(&keypoints, &predictions, &cancel).unwrap_err();
        assert_eq!(err, RelocFail::Timeout);
    }

    #[test]
    fn cancellation_before_first_dispatch_is_observed() {
        let (keypoints, predictions) =
            scene_with_exact_correspondences(12, Rotation3::identity(), Vector3::zeros());
        let config = RelocaliserConfig::default();
        let reloc = Relocaliser::new(forest_stub(), config);
        let cancel = AtomicBool::new(true);

        let err = reloc.relocalise(&keypoints, &predictions, &cancel).unwrap_err();
        assert_eq!(err, RelocFail::Cancelled);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let keypoints = KeypointsImage::new(4, 4, Keypoint::invalid());
        let descriptors = DescriptorsImage::new(4, 3, Vec::new());
        let reloc = Relocaliser::new(forest_stub(), RelocaliserConfig::default());
        let err = reloc.predict(&keypoints, &descriptors).unwrap_err();
        assert!(matches!(err, ShapeMismatch::KeypointsVsDescriptors { .. }));
    }
}
