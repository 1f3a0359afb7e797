//! Levenberg–Marquardt continuous pose optimisation over the `SE(3)`
//! manifold (§4.G step 3).
//!
//! Minimises `Σ_i w_i ‖R x_i + t − μ_i‖²` by iterating a tangent-space update
//! `ξ = (ρ, φ)` applied through [`crate::pose::se3_exp`] and
//! [`crate::pose::compose`], matching the closed-form left-perturbation
//! Jacobian `J_i = [I, −[R x_i + t]_×]`.

use nalgebra::{Matrix3x6, Vector3, Vector6};

use crate::pose::{compose, se3_exp, skew, Pose};

/// Parameters for one refinement run (§6 config keys `lmMaxIters`/`lmTolRel`).
#[derive(Debug, Clone, Copy)]
pub struct LmConfig {
    pub max_iters: usize,
    pub tol_rel: f64,
}

const INITIAL_LAMBDA: f64 = 1e-3;
const STEP_RETRIES: usize = 10;

/// Refine `initial` against weighted correspondences `(x_cam_i, mu_i, w_i)`.
///
/// Returns `None` on the numerical failure modes of §7: a non-finite initial
/// residual, or ten consecutive step rejections within a single iteration
/// (the stand-in for "singular normal matrix" on this closed-form Jacobian,
/// since the normal matrix here is always PSD and the only way to fail to
/// improve is a genuinely degenerate correspondence set).
///
/// # Examples
///
/// ```
/// use nalgebra::Vector3;
/// use scoreforest_reloc::lm::{refine_pose, LmConfig};
/// use scoreforest_reloc::pose::Pose;
///
/// let pose = Pose::identity();
/// let correspondences = vec![
///     (Vector3::new(0.0, 0.0, 1.0), Vector3::new(0.0, 0.0, 1.0), 1.0),
///     (Vector3::new(1.0, 0.0, 1.0), Vector3::new(1.0, 0.0, 1.0), 1.0),
///     (Vector3::new(0.0, 1.0, 1.0), Vector3::new(0.0, 1.0, 1.0), 1.0),
/// ];
/// let config = LmConfig { max_iters: 10, tol_rel: 1e-4 };
/// let refined = refine_pose(pose, &correspondences, &config).unwrap();
/// assert!((refined.translation).norm() < 1e-6);
/// ```
pub fn refine_pose(
    initial: Pose,
    correspondences: &[(Vector3<f64>, Vector3<f64>, f64)],
    config: &LmConfig,
) -> Option<Pose> {
    if correspondences.is_empty() {
        return None;
    }

    let mut pose = initial;
    let mut lambda = INITIAL_LAMBDA;
    let mut cost = weighted_cost(&pose, correspondences);
    if !cost.is_finite() {
        return None;
    }

    for _ in 0..config.max_iters {
        let (jtj, jtr) = normal_equations(&pose, correspondences);
        let mut step_taken = false;

        for _ in 0..STEP_RETRIES {
            let mut augmented = jtj;
            for i in 0..6 {
                augmented[(i, i)] += lambda * jtj[(i, i)].abs().max(1e-12);
            }

            let inv = match augmented.try_inverse() {
                Some(inv) => inv,
                None => {
                    lambda *= 10.0;
                    continue;
                }
            };
            let delta = -(inv * jtr);
            if !delta.iter().all(|v| v.is_finite()) {
                lambda *= 10.0;
                continue;
            }

            let rho = Vector3::new(delta[0], delta[1], delta[2]);
            let phi = Vector3::new(delta[3], delta[4], delta[5]);
            let (d_r, d_t) = se3_exp(rho, phi);
            let candidate_pose = compose((d_r, d_t), &pose);
            let candidate_cost = weighted_cost(&candidate_pose, correspondences);

            if candidate_cost.is_finite() && candidate_cost <= cost {
                let rel_drop = (cost - candidate_cost) / cost.max(1e-12);
                pose = candidate_pose;
                cost = candidate_cost;
                lambda = (lambda / 10.0).max(1e-12);
                step_taken = true;
                if rel_drop < config.tol_rel {
                    return Some(pose);
                }
                break;
            } else {
                lambda *= 10.0;
            }
        }

        if !step_taken {
            return None;
        }
    }

    Some(pose)
}

fn weighted_cost(pose: &Pose, correspondences: &[(Vector3<f64>, Vector3<f64>, f64)]) -> f64 {
    let mut total = 0.0;
    for (x, mu, w) in correspondences {
        let r = pose.apply(x) - mu;
        total += w * r.dot(&r);
    }
    total
}

/// `J^T W J` and `J^T W r` for `J_i = [I_3, −[R x_i + t]_×]`, accumulated over
/// all correspondences (§4.G step 3). The skew block uses the full
/// transformed point `q = R x_i + t`, not just `R x_i`: `compose` applies the
/// tangent increment on the left as `T_new(p) = dR (R p + t) + dt`, so
/// `∂r/∂φ = −[R p + t]_×`.
fn normal_equations(
    pose: &Pose,
    correspondences: &[(Vector3<f64>, Vector3<f64>, f64)],
) -> (nalgebra::Matrix6<f64>, Vector6<f64>) {
    let mut jtj = nalgebra::Matrix6::zeros();
    let mut jtr = Vector6::zeros();

    for (x, mu, w) in correspondences {
        let q = pose.rotation * x + pose.translation;
        let residual = q - mu;
        let neg_skew = -skew(&q);

        let mut j = Matrix3x6::zeros();
        for r in 0..3 {
            for c in 0..3 {
                j[(r, c)] = if r == c { 1.0 } else { 0.0 };
                j[(r, c + 3)] = neg_skew[(r, c)];
            }
        }

        jtj += j.transpose() * j * *w;
        jtr += j.transpose() * residual * *w;
    }

    (jtj, jtr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Rotation3;

    fn triangle() -> [Vector3<f64>; 3] {
        [
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(1.0, 0.0, 1.0),
            Vector3::new(0.0, 1.0, 1.0),
        ]
    }

    #[test]
    fn converges_to_exact_pose_from_identity() {
        let r_true = Rotation3::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_6);
        let t_true = Vector3::new(2.0, 3.0, 4.0);
        let corr: Vec<_> = triangle()
            .iter()
            .map(|p| (*p, r_true * p + t_true, 1.0))
            .collect();

        let config = LmConfig {
            max_iters: 10,
            tol_rel: 1e-4,
        };
        let refined = refine_pose(Pose::identity(), &corr, &config).unwrap();
        assert!((refined.rotation.matrix() - r_true.matrix()).norm() < 1e-4);
        assert!((refined.translation - t_true).norm() < 1e-4);
    }

    #[test]
    fn optimal_pose_is_a_near_fixed_point() {
        let r_true = Rotation3::from_euler_angles(0.05, 0.1, -0.05);
        let t_true = Vector3::new(0.1, -0.2, 0.3);
        let corr: Vec<_> = triangle()
            .iter()
            .map(|p| (*p, r_true * p + t_true, 1.0))
            .collect();

        let config = LmConfig {
            max_iters: 10,
            tol_rel: 1e-4,
        };
        let optimal = Pose::new(r_true, t_true);
        let refined = refine_pose(optimal, &corr, &config).unwrap();
        assert!((refined.rotation.matrix() - r_true.matrix()).norm() < 1e-4);
        assert!((refined.translation - t_true).norm() < 1e-4);
    }

    #[test]
    fn empty_correspondences_fail() {
        let config = LmConfig {
            max_iters: 10,
            tol_rel: 1e-4,
        };
        assert!(refine_pose(Pose::identity(), &[], &config).is_none());
    }
}
