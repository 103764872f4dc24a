use nalgebra::{Matrix3, Matrix3x6, Point3, Rotation3, Vector3};

/// Rigid transform mapping board coordinates into camera coordinates:
/// `X_cam = R * X_board + t`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

impl Pose {
    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Rotation3::identity(), Vector3::zeros())
    }

    /// Build from a Rodrigues (axis * angle) vector and a translation.
    pub fn from_rodrigues(rvec: Vector3<f64>, tvec: Vector3<f64>) -> Self {
        Self::new(Rotation3::from_scaled_axis(rvec), tvec)
    }

    /// Rodrigues (axis * angle) representation of the rotation.
    pub fn rodrigues(&self) -> Vector3<f64> {
        self.rotation.scaled_axis()
    }

    /// Pack as `[rx, ry, rz, tx, ty, tz]`.
    pub fn to_params(&self) -> [f64; 6] {
        let r = self.rodrigues();
        let t = self.translation;
        [r.x, r.y, r.z, t.x, t.y, t.z]
    }

    /// Inverse of [`Pose::to_params`]. `params` must hold at least 6 values.
    pub fn from_params(params: &[f64]) -> Self {
        Self::from_rodrigues(
            Vector3::new(params[0], params[1], params[2]),
            Vector3::new(params[3], params[4], params[5]),
        )
    }

    /// `d (R(w) p + t) / d [w, t]` at the packed parameters `[w, t]`.
    ///
    /// Uses the SO(3) right Jacobian, so it holds for any `w`, not only the
    /// canonical one returned by [`Pose::rodrigues`].
    pub fn params_jacobian(params: &[f64], p: &Point3<f64>) -> Matrix3x6<f64> {
        let w = Vector3::new(params[0], params[1], params[2]);
        let rotation = Rotation3::from_scaled_axis(w);
        let d_rot = -(rotation.matrix() * p.coords.cross_matrix() * so3_right_jacobian(&w));
        let mut jac = Matrix3x6::zeros();
        jac.fixed_view_mut::<3, 3>(0, 0).copy_from(&d_rot);
        jac.fixed_view_mut::<3, 3>(0, 3).copy_from(&Matrix3::identity());
        jac
    }

    #[inline]
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * p.coords + self.translation)
    }

    /// Angle (radians) of the relative rotation between two poses.
    pub fn rotation_angle_to(&self, other: &Pose) -> f64 {
        // atan2 form stays accurate near zero, unlike acos of the trace.
        let m = self.rotation.rotation_to(&other.rotation).into_inner();
        let sin = 0.5
            * Vector3::new(
                m[(2, 1)] - m[(1, 2)],
                m[(0, 2)] - m[(2, 0)],
                m[(1, 0)] - m[(0, 1)],
            )
            .norm();
        let cos = 0.5 * (m.trace() - 1.0);
        sin.atan2(cos)
    }
}

fn so3_right_jacobian(w: &Vector3<f64>) -> Matrix3<f64> {
    let theta = w.norm();
    let wx = w.cross_matrix();
    if theta < 1e-8 {
        return Matrix3::identity() - 0.5 * wx + wx * wx / 6.0;
    }
    let t2 = theta * theta;
    Matrix3::identity() - (1.0 - theta.cos()) / t2 * wx + (theta - theta.sin()) / (t2 * theta) * wx * wx
}
