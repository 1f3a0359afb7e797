//! Rigid-body pose type and SE(3) manifold helpers used by the refiner
//! (4.G).

use nalgebra::{Matrix3, Rotation3, Vector3};

/// A rigid-body camera pose `(R, t)` with `R ∈ SO(3)`.
///
/// # Examples
///
/// ```
/// use scoreforest_reloc::pose::Pose;
/// use nalgebra::{Rotation3, Vector3};
///
/// let pose = Pose::identity();
/// let p = Vector3::new(1.0, 2.0, 3.0);
/// assert_eq!(pose.apply(&p), p);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

impl Pose {
    pub fn identity() -> Self {
        Pose {
            rotation: Rotation3::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Pose {
            rotation,
            translation,
        }
    }

    /// Maps an eye-space point into scene space: `y = R x + t`.
    pub fn apply(&self, x: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * x + self.translation
    }
}

/// Skew-symmetric cross-product matrix `[v]_x` such that `[v]_x w = v × w`.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

/// `SE(3)` exponential map. `xi = [rho; phi]` is a 6-vector tangent element
/// (translation part first, rotation part second); returns the corresponding
/// `(R, t)` increment.
///
/// Follows the standard closed form (e.g. Barfoot, *State Estimation for
/// Robotics*, §7.1.5): `R = Exp(phi)`, `t = V(phi) rho`, where `V` reduces to
/// the identity as `phi -> 0`.
pub fn se3_exp(rho: Vector3<f64>, phi: Vector3<f64>) -> (Rotation3<f64>, Vector3<f64>) {
    let theta = phi.norm();
    let rotation = Rotation3::new(phi);

    let v = if theta < 1e-8 {
        Matrix3::identity()
    } else {
        let k = skew(&phi) / theta;
        let a = (1.0 - theta.cos()) / theta;
        let b = 1.0 - theta.sin() / theta;
        Matrix3::identity() + a * k + b * (k * k)
    };

    (rotation, v * rho)
}

/// Left-composes an SE(3) increment `(dR, dt)` onto `(R, t)`:
/// `(R', t') = (dR R, dR t + dt)`.
pub fn compose(delta: (Rotation3<f64>, Vector3<f64>), pose: &Pose) -> Pose {
    let (d_rot, d_t) = delta;
    Pose {
        rotation: d_rot * pose.rotation,
        translation: d_rot * pose.translation + d_t,
    }
}

/// Non-collinearity test used by the candidate generator invariant (§3: "the
/// three `x_cam_i` are non-collinear"). Returns true when the triangle formed
/// by the three points has area above a small epsilon relative to its scale.
pub fn non_collinear(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> bool {
    let ab = b - a;
    let ac = c - a;
    let cross_norm = ab.cross(&ac).norm();
    let scale = ab.norm().max(ac.norm()).max(1e-12);
    cross_norm / (scale * scale) > 1e-6
}
