//! Modal clusters: Gaussians in scene space (§3).

use nalgebra::{Matrix3, Vector3};

const LN_2PI: f64 = 1.8378770664093453;

/// One Gaussian component of a per-keypoint scene-space mixture.
///
/// Invariant: `inv_cov` is symmetric (§3). The forest file stores
/// `Σ⁻¹` and `log|Σ|` directly (§6), so no matrix inversion is needed on the
/// hot path.
#[derive(Debug, Clone, PartialEq)]
pub struct Mode {
    pub mean: Vector3<f64>,
    pub inv_cov: Matrix3<f64>,
    pub log_det_cov: f64,
    pub n: u32,
    pub colour_mean: Option<[u8; 3]>,
}

impl Mode {
    /// Log-density `ln N(x; mean, Σ)` of this Gaussian at `x`.
    pub fn log_density(&self, x: &Vector3<f64>) -> f64 {
        let d = x - self.mean;
        let mahalanobis = (d.transpose() * self.inv_cov * d)[(0, 0)];
        -0.5 * (3.0 * LN_2PI + self.log_det_cov + mahalanobis)
    }

    /// Squared Mahalanobis distance from `x` to this mode's mean.
    pub fn mahalanobis_sq(&self, x: &Vector3<f64>) -> f64 {
        let d = x - self.mean;
        (d.transpose() * self.inv_cov * d)[(0, 0)]
    }
}

/// Weighted merge of two modes by sample count, used by the greedy
/// radius-based clustering of 4.B. Recomputes `inv_cov`/`log_det_cov` for the
/// merged Gaussian (moment-matched combination of the two source Gaussians).
pub fn merge_modes(a: &Mode, b: &Mode) -> Mode {
    let na = a.n as f64;
    let nb = b.n as f64;
    let total = na + nb;
    let mean = (a.mean * na + b.mean * nb) / total;

    let cov_a = a
        .inv_cov
        .try_inverse()
        .unwrap_or_else(Matrix3::identity);
    let cov_b = b
        .inv_cov
        .try_inverse()
        .unwrap_or_else(Matrix3::identity);

    // Moment matching: combined covariance is the sample-count-weighted
    // average of the two covariances plus the spread between their means
    // (law of total variance for a two-component mixture).
    let da = a.mean - mean;
    let db = b.mean - mean;
    let cov = (cov_a + da * da.transpose()) * (na / total)
        + (cov_b + db * db.transpose()) * (nb / total);

    let (inv_cov, log_det_cov) = invert_with_log_det(&cov);

    Mode {
        mean,
        inv_cov,
        log_det_cov,
        n: a.n + b.n,
        colour_mean: None,
    }
}

fn invert_with_log_det(cov: &Matrix3<f64>) -> (Matrix3<f64>, f64) {
    let det = cov.determinant().max(1e-18);
    let inv = cov.try_inverse().unwrap_or_else(Matrix3::identity);
    (inv, det.ln())
}
