//! Weighted Kabsch algorithm: closed-form optimal rigid transform between two
//! paired, weighted point sets under the Frobenius norm (§4.C step 4, §4.G
//! step 2).

use nalgebra::{Matrix3, Rotation3, Vector3};

/// Solve for `(R, t)` minimising `Σ w_i ‖R a_i + t − b_i‖²` over the weighted
/// correspondences `(a_i, b_i, w_i)`.
///
/// Returns `None` when fewer than 3 correspondences are given, the total
/// weight is non-positive, or the cross-covariance matrix is singular enough
/// that its SVD fails to produce finite factors — the "singular Kabsch"
/// failure mode of §7, which callers fold into candidate demotion rather than
/// propagating as an error.
///
/// # Examples
///
/// ```
/// use nalgebra::{Rotation3, Vector3};
/// use scoreforest_reloc::kabsch::weighted_kabsch;
///
/// let t_true = Vector3::new(2.0, 3.0, 4.0);
/// let a = [
///     Vector3::new(0.0, 0.0, 1.0),
///     Vector3::new(1.0, 0.0, 1.0),
///     Vector3::new(0.0, 1.0, 1.0),
/// ];
/// let pairs: Vec<_> = a.iter().map(|p| (*p, p + t_true, 1.0)).collect();
/// let (r, t) = weighted_kabsch(&pairs).unwrap();
/// assert!((r.matrix() - Rotation3::identity().matrix()).norm() < 1e-8);
/// assert!((t - t_true).norm() < 1e-8);
/// ```
pub fn weighted_kabsch(
    pairs: &[(Vector3<f64>, Vector3<f64>, f64)],
) -> Option<(Rotation3<f64>, Vector3<f64>)> {
    if pairs.len() < 3 {
        return None;
    }

    let w_sum: f64 = pairs.iter().map(|(_, _, w)| w).sum();
    if !(w_sum > 0.0) || !w_sum.is_finite() {
        return None;
    }

    let mut centroid_a = Vector3::zeros();
    let mut centroid_b = Vector3::zeros();
    for (a, b, w) in pairs {
        centroid_a += a * *w;
        centroid_b += b * *w;
    }
    centroid_a /= w_sum;
    centroid_b /= w_sum;

    let mut h = Matrix3::zeros();
    for (a, b, w) in pairs {
        let da = a - centroid_a;
        let db = b - centroid_b;
        h += da * db.transpose() * *w;
    }

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let v = v_t.transpose();

    // reflection fix: det(V U^T) determines the sign of the last singular
    // direction, guaranteeing R ∈ SO(3) rather than O(3) \ SO(3).
    let det = (v * u.transpose()).determinant();
    let d = if det < 0.0 { -1.0 } else { 1.0 };
    let correction = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, d);
    let r = v * correction * u.transpose();

    if !r.iter().all(|x| x.is_finite()) {
        return None;
    }

    let rotation = Rotation3::from_matrix_unchecked(r);
    let translation = centroid_b - rotation * centroid_a;
    if !translation.iter().all(|x| x.is_finite()) {
        return None;
    }

    Some((rotation, translation))
}
