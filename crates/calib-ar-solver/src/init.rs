//! Closed-form initialisation from plane homographies.
//!
//! For a board on `Z = 0`, each view's homography is `H ~ K [r1 r2 t]`.
//! Orthonormality of `r1, r2` gives two linear constraints per view on the
//! image of the absolute conic `B = K^-T K^-1`.

use calib_ar_core::{Intrinsics, Pose};
use nalgebra::{DMatrix, Matrix2, Matrix3, Rotation3, SVector, Vector2, Vector3};

fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> SVector<f64, 6> {
    let hi = h.column(i);
    let hj = h.column(j);
    SVector::<f64, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

// Maps pixels to roughly [-0.5, 0.5] so the conic system is well conditioned.
fn preconditioner(resolution: (u32, u32)) -> Matrix3<f64> {
    let (w, h) = (resolution.0 as f64, resolution.1 as f64);
    let s = 1.0 / w.max(h).max(1.0);
    Matrix3::new(s, 0.0, -0.5 * w * s, 0.0, s, -0.5 * h * s, 0.0, 0.0, 1.0)
}

/// Zhang's closed-form intrinsics (skew discarded). Needs three or more views.
///
/// Returns `None` for degenerate view sets (e.g. all boards parallel).
pub fn zhang_intrinsics(homographies: &[Matrix3<f64>], resolution: (u32, u32)) -> Option<Intrinsics> {
    if homographies.len() < 3 {
        return None;
    }
    let n = preconditioner(resolution);

    let m = homographies.len();
    let mut v = DMatrix::<f64>::zeros(2 * m, 6);
    for (k, h) in homographies.iter().enumerate() {
        let hn = n * h;
        let hn = hn / hn.norm();
        let v11 = v_ij(&hn, 0, 0);
        let v22 = v_ij(&hn, 1, 1);
        let v12 = v_ij(&hn, 0, 1);
        v.row_mut(2 * k).copy_from(&v12.transpose());
        v.row_mut(2 * k + 1).copy_from(&(v11 - v22).transpose());
    }

    let svd = (v.transpose() * &v).svd(false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let mut b = v_t.row(min_idx).transpose();
    if b[0] < 0.0 {
        b = -b;
    }
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    if denom.abs() <= 1e-12 * (b11 * b11 + b22 * b22) {
        return None;
    }
    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    if lambda <= 0.0 {
        return None;
    }
    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    // Undo the preconditioner: K = N^-1 K'.
    let k_pre = Matrix3::new(alpha, 0.0, u0, 0.0, beta, v0, 0.0, 0.0, 1.0);
    let k = n.try_inverse()? * k_pre;
    let intr = Intrinsics::from_matrix(&k);
    intr.is_finite().then_some(intr)
}

/// Focal lengths from homographies with the principal point held at `(cx, cy)`.
///
/// Least squares over all views of the two conic constraints with
/// `B = diag(1/fx^2, 1/fy^2, 1)`; usable from a single tilted view.
pub fn focal_with_principal_point(homographies: &[Matrix3<f64>], cx: f64, cy: f64) -> Option<(f64, f64)> {
    if homographies.is_empty() {
        return None;
    }
    let shift = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);

    let mut ata = Matrix2::<f64>::zeros();
    let mut atb = Vector2::<f64>::zeros();
    for h in homographies {
        let h = shift * h;
        let h = h / h.norm();
        let rows = [
            (
                Vector2::new(h[(0, 0)] * h[(0, 1)], h[(1, 0)] * h[(1, 1)]),
                -h[(2, 0)] * h[(2, 1)],
            ),
            (
                Vector2::new(
                    h[(0, 0)].powi(2) - h[(0, 1)].powi(2),
                    h[(1, 0)].powi(2) - h[(1, 1)].powi(2),
                ),
                -(h[(2, 0)].powi(2) - h[(2, 1)].powi(2)),
            ),
        ];
        for (a, rhs) in rows {
            ata += a * a.transpose();
            atb += a * rhs;
        }
    }

    // Fronto-parallel views leave the system rank deficient.
    let trace = ata.trace();
    if ata.determinant().abs() <= 1e-9 * trace * trace {
        return None;
    }
    let x = ata.try_inverse()? * atb;
    if x[0] <= 0.0 || x[1] <= 0.0 {
        return None;
    }
    let (fx, fy) = (1.0 / x[0].sqrt(), 1.0 / x[1].sqrt());
    (fx.is_finite() && fy.is_finite()).then_some((fx, fy))
}

/// Board-to-camera pose from a plane homography and the camera matrix.
///
/// The rotation is projected onto SO(3); the sign is chosen so the board lies
/// in front of the camera.
pub fn pose_from_homography(k: &Matrix3<f64>, h: &Matrix3<f64>) -> Option<Pose> {
    let k_inv = k.try_inverse()?;
    let a1 = k_inv * h.column(0);
    let a2 = k_inv * h.column(1);
    let a3 = k_inv * h.column(2);

    let norm = 0.5 * (a1.norm() + a2.norm());
    if norm <= f64::EPSILON {
        return None;
    }
    let mut lambda = 1.0 / norm;
    if a3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1: Vector3<f64> = a1 * lambda;
    let r2: Vector3<f64> = a2 * lambda;
    let r3 = r1.cross(&r2);
    let r = Matrix3::from_columns(&[r1, r2, r3]);

    let svd = r.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut r_orth = u * v_t;
    if r_orth.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r_orth = u_flipped * v_t;
    }

    let t: Vector3<f64> = a3 * lambda;
    if !t.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(Pose::new(Rotation3::from_matrix_unchecked(r_orth), t))
}
