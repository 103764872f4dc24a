//! Pinhole camera with Brown–Conrady lens distortion.
//!
//! Projection pipeline (OpenCV convention):
//! board point → [`Pose`] → camera frame → perspective division →
//! distortion on normalized coordinates → intrinsics → pixel.

use crate::Pose;
use nalgebra::{Matrix2, Matrix2x3, Matrix2x4, Matrix2x5, Matrix3, Point2, Point3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics without skew.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// The 3x3 camera matrix `K`.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Read `fx, fy, cx, cy` from a camera matrix (skew is ignored).
    pub fn from_matrix(k: &Matrix3<f64>) -> Self {
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)])
    }

    #[inline]
    pub fn pixel_from_normalized(&self, n: &Vector2<f64>) -> Point2<f64> {
        Point2::new(self.fx * n.x + self.cx, self.fy * n.y + self.cy)
    }

    #[inline]
    pub fn normalized_from_pixel(&self, p: &Point2<f64>) -> Vector2<f64> {
        Vector2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    pub fn is_finite(&self) -> bool {
        [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .all(|v| v.is_finite())
            && self.fx > 0.0
            && self.fy > 0.0
    }
}

/// Five-coefficient radial + tangential distortion, OpenCV order
/// `[k1, k2, p1, p2, k3]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BrownConrady {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl BrownConrady {
    const UNDISTORT_ITERS: usize = 20;

    pub fn from_coeffs(c: [f64; 5]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    pub fn coeffs(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn is_zero(&self) -> bool {
        self.coeffs().iter().all(|c| *c == 0.0)
    }

    pub fn distort(&self, n: &Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let xy = x * y;
        let dx = 2.0 * self.p1 * xy + self.p2 * (r2 + 2.0 * x * x);
        let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * xy;
        Vector2::new(x * radial + dx, y * radial + dy)
    }

    /// Fixed-point inversion of [`BrownConrady::distort`].
    pub fn undistort(&self, d: &Vector2<f64>) -> Vector2<f64> {
        if self.is_zero() {
            return *d;
        }
        let mut u = *d;
        for _ in 0..Self::UNDISTORT_ITERS {
            let err = self.distort(&u) - d;
            u -= err;
            if err.norm_squared() < 1e-24 {
                break;
            }
        }
        u
    }
}

/// Pixel projection of a camera-frame point with its first derivatives.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectionJacobian {
    pub pixel: Point2<f64>,
    /// `d pixel / d point`, point in the camera frame.
    pub d_point: Matrix2x3<f64>,
    /// `d pixel / d [fx, fy, cx, cy]`.
    pub d_intrinsics: Matrix2x4<f64>,
    /// `d pixel / d [k1, k2, p1, p2, k3]`.
    pub d_distortion: Matrix2x5<f64>,
}

/// Calibrated camera: intrinsics plus lens distortion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub intrinsics: Intrinsics,
    pub distortion: BrownConrady,
}

impl CameraModel {
    pub fn new(intrinsics: Intrinsics, distortion: BrownConrady) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    /// Distortion-free camera.
    pub fn pinhole(intrinsics: Intrinsics) -> Self {
        Self::new(intrinsics, BrownConrady::default())
    }

    pub fn intrinsic_matrix(&self) -> Matrix3<f64> {
        self.intrinsics.matrix()
    }

    pub fn distortion_coeffs(&self) -> [f64; 5] {
        self.distortion.coeffs()
    }

    /// Project a point already expressed in the camera frame.
    ///
    /// No cheirality check: points behind the camera are mirrored through the
    /// optical centre. Use [`CameraModel::project`] when that matters.
    #[inline]
    pub fn project_camera_point(&self, p: &Vector3<f64>) -> Point2<f64> {
        let n = Vector2::new(p.x / p.z, p.y / p.z);
        self.intrinsics
            .pixel_from_normalized(&self.distortion.distort(&n))
    }

    /// [`CameraModel::project_camera_point`] plus analytic derivatives.
    pub fn project_with_jacobian(&self, p: &Vector3<f64>) -> ProjectionJacobian {
        let Intrinsics { fx, fy, cx, cy } = self.intrinsics;
        let BrownConrady { k1, k2, p1, p2, k3 } = self.distortion;
        let iz = 1.0 / p.z;
        let (x, y) = (p.x * iz, p.y * iz);

        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
        let d_radial = k1 + r2 * (2.0 * k2 + 3.0 * k3 * r2);
        let xy = x * y;
        let xd = x * radial + 2.0 * p1 * xy + p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * xy;

        let cross = 2.0 * xy * d_radial + 2.0 * p1 * x + 2.0 * p2 * y;
        let d_distorted = Matrix2::new(
            radial + 2.0 * x * x * d_radial + 2.0 * p1 * y + 6.0 * p2 * x,
            cross,
            cross,
            radial + 2.0 * y * y * d_radial + 6.0 * p1 * y + 2.0 * p2 * x,
        );
        let d_normalized = Matrix2x3::new(iz, 0.0, -x * iz, 0.0, iz, -y * iz);
        let focal = Matrix2::new(fx, 0.0, 0.0, fy);

        let (r4, r6) = (r2 * r2, r2 * r2 * r2);
        ProjectionJacobian {
            pixel: Point2::new(fx * xd + cx, fy * yd + cy),
            d_point: focal * d_distorted * d_normalized,
            d_intrinsics: Matrix2x4::new(xd, 0.0, 1.0, 0.0, 0.0, yd, 0.0, 1.0),
            d_distortion: Matrix2x5::new(
                fx * x * r2,
                fx * x * r4,
                fx * 2.0 * xy,
                fx * (r2 + 2.0 * x * x),
                fx * x * r6,
                fy * y * r2,
                fy * y * r4,
                fy * (r2 + 2.0 * y * y),
                fy * 2.0 * xy,
                fy * y * r6,
            ),
        }
    }

    /// Project a board point through `pose`; `None` when it lies behind the camera.
    pub fn project(&self, pose: &Pose, p: &Point3<f64>) -> Option<Point2<f64>> {
        let pc = pose.transform_point(p);
        if pc.z <= f64::EPSILON {
            return None;
        }
        Some(self.project_camera_point(&pc.coords))
    }

    /// Project every point, preserving input order.
    ///
    /// Points behind the camera are projected without the cheirality check so
    /// the output stays index-aligned with the input.
    pub fn project_points(&self, pose: &Pose, points: &[Point3<f64>]) -> Vec<Point2<f64>> {
        points
            .iter()
            .map(|p| self.project_camera_point(&pose.transform_point(p).coords))
            .collect()
    }

    /// Undistorted normalized coordinates of a pixel.
    pub fn normalize(&self, p: &Point2<f64>) -> Vector2<f64> {
        self.distortion
            .undistort(&self.intrinsics.normalized_from_pixel(p))
    }

    /// Pixel position of a pixel after removing lens distortion.
    pub fn undistort_pixel(&self, p: &Point2<f64>) -> Point2<f64> {
        self.intrinsics.pixel_from_normalized(&self.normalize(p))
    }
}
