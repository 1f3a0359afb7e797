//! Component C: Candidate Generator (§4.C).
//!
//! Samples up to `M_max` rigid-transform candidates from Kabsch triples of
//! `(keypoint, sampled mode)` correspondences, filtered by the geometric
//! feasibility tests of §4.C step 3.

use std::mem::MaybeUninit;

use nalgebra::Vector3;
use rand::Rng;

use crate::config::RelocaliserConfig;
use crate::dispatch::{AtomicSlotCounter, Dispatch, ScatterWrite};
use crate::kabsch::weighted_kabsch;
use crate::keypoint::{Image, KeypointsImage};
use crate::pose::{non_collinear, Pose};
use crate::prediction::ScorePrediction;
use crate::rng::slot_rng;

/// One of the three correspondences a candidate was built from (§3).
#[derive(Debug, Clone)]
pub struct Correspondence {
    pub keypoint_index: usize,
    pub mode_index: usize,
    pub x_cam: Vector3<f64>,
    pub mu: Vector3<f64>,
}

/// A sampled rigid-transform candidate (§3). `energy` starts at `+inf` until
/// the preemptive loop's first scoring round.
#[derive(Debug, Clone)]
pub struct PoseCandidate {
    pub pose: Pose,
    pub correspondences: [Correspondence; 3],
    pub energy: f64,
    pub in_use: bool,
}

/// Uniformly samples a valid, usable keypoint and one of its modes. Policy
/// `use_all_modes`: uniform over all available modes; otherwise always the
/// highest-weight mode (modes are ordered by `n` descending at merge time,
/// so that is index 0).
fn pick_keypoint_and_mode(
    keypoints: &KeypointsImage,
    predictions: &Image<ScorePrediction>,
    use_all_modes: bool,
    rng: &mut impl Rng,
) -> Option<(usize, usize)> {
    let idx = rng.gen_range(0..keypoints.len());
    if !keypoints.at(idx).valid {
        return None;
    }
    let prediction = predictions.at(idx);
    if !prediction.is_usable() {
        return None;
    }
    let mode_index = if use_all_modes {
        rng.gen_range(0..prediction.modes().len())
    } else {
        0
    };
    Some((idx, mode_index))
}

fn try_generate_one(
    keypoints: &KeypointsImage,
    predictions: &Image<ScorePrediction>,
    config: &RelocaliserConfig,
    rng: &mut impl Rng,
) -> Option<PoseCandidate> {
    'retry: for _ in 0..config.generator_retry_budget {
        let mut picks: [(usize, usize); 3] = [(0, 0); 3];
        for slot in picks.iter_mut() {
            match pick_keypoint_and_mode(keypoints, predictions, config.use_all_modes, rng) {
                Some(p) => *slot = p,
                None => continue 'retry,
            }
        }

        let corr: Vec<Correspondence> = picks
            .iter()
            .map(|&(ki, mi)| {
                let kp = keypoints.at(ki);
                let mode = &predictions.at(ki).modes()[mi];
                Correspondence {
                    keypoint_index: ki,
                    mode_index: mi,
                    x_cam: kp.x_cam,
                    mu: mode.mean,
                }
            })
            .collect();

        if config.check_min_distance {
            let mut min_sep_sq = f64::INFINITY;
            for i in 0..3 {
                for j in 0..3 {
                    if i != j {
                        min_sep_sq = min_sep_sq.min((corr[i].mu - corr[j].mu).norm_squared());
                    }
                }
            }
            if min_sep_sq < config.d_min * config.d_min {
                continue 'retry;
            }
        }

        if config.check_rigid_transform {
            for i in 0..3 {
                for j in (i + 1)..3 {
                    let scene_dist = (corr[i].mu - corr[j].mu).norm();
                    let cam_dist = (corr[i].x_cam - corr[j].x_cam).norm();
                    if (scene_dist - cam_dist).abs() > config.tau_t {
                        continue 'retry;
                    }
                }
            }
        }

        if !non_collinear(&corr[0].x_cam, &corr[1].x_cam, &corr[2].x_cam) {
            continue 'retry;
        }

        let pairs: Vec<(Vector3<f64>, Vector3<f64>, f64)> =
            corr.iter().map(|c| (c.x_cam, c.mu, 1.0)).collect();
        let (rotation, translation) = match weighted_kabsch(&pairs) {
            Some(rt) => rt,
            None => continue 'retry,
        };

        let correspondences: [Correspondence; 3] = [corr[0].clone(), corr[1].clone(), corr[2].clone()];
        return Some(PoseCandidate {
            pose: Pose::new(rotation, translation),
            correspondences,
            energy: f64::INFINITY,
            in_use: true,
        });
    }
    None
}

/// Generates up to `config.m_max` candidates (§4.C). Each of `m_max` slots is
/// tried in parallel (§5: parallel over slots); successful slots reserve the
/// next free output position via [`AtomicSlotCounter`], so the result is
/// exactly the "dense prefix of valid candidates" §4.C requires, published
/// through that single atomic counter.
pub fn generate_candidates(
    keypoints: &KeypointsImage,
    predictions: &Image<ScorePrediction>,
    config: &RelocaliserConfig,
    dispatch: &dyn Dispatch,
) -> Vec<PoseCandidate> {
    let m_max = config.m_max;
    let mut arena: Vec<MaybeUninit<PoseCandidate>> =
        (0..m_max).map(|_| MaybeUninit::uninit()).collect();
    let counter = AtomicSlotCounter::new(m_max);

    {
        let scatter = ScatterWrite::over_uninit(&mut arena);
        dispatch.for_each(m_max, &|slot| {
            let mut rng = slot_rng(config.rng_seed, slot as u64);
            if let Some(candidate) = try_generate_one(keypoints, predictions, config, &mut rng) {
                if let Some(dest) = counter.try_reserve() {
                    scatter.write(dest, candidate);
                }
            }
        });
    }

    let produced = counter.len();
    arena.truncate(produced);
    // SAFETY: `produced` is exactly the number of prefix slots written by
    // `scatter.write` above; the dropped tail was never written, and
    // `MaybeUninit::drop` on an unwritten slot is a no-op.
    arena
        .into_iter()
        .map(|slot| unsafe { slot.assume_init() })
        .collect()
}
