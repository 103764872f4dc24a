//! Robust pose of a planar board from one frame.
//!
//! Hypotheses come from minimal 4-point homographies between the board plane
//! and undistorted normalized image coordinates; they are scored by full
//! model pixel reprojection error, and the winner is refined with
//! Levenberg–Marquardt on its inliers.

use crate::init::pose_from_homography;
use crate::optim::{minimize, NllsProblem, SolveError, SolveOptions};
use crate::ransac::{ransac, Estimator, RansacOptions};
use calib_ar_core::{estimate_homography, homography_from_4pt, CameraModel, Pose};
use log::trace;
use nalgebra::{DMatrix, DVector, Matrix3, Point2, Point3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PnpRansacParams {
    /// Inlier threshold on the pixel reprojection error.
    pub reprojection_threshold: f64,
    pub min_inliers: usize,
    pub max_iterations: usize,
    pub confidence: f64,
    pub seed: u64,
    /// Non-linear refinement of the winning hypothesis on its inliers.
    pub refine: Option<SolveOptions>,
}

impl Default for PnpRansacParams {
    fn default() -> Self {
        Self {
            reprojection_threshold: 8.0,
            min_inliers: 4,
            max_iterations: 100,
            confidence: 0.99,
            seed: 0x5eed,
            refine: Some(SolveOptions {
                max_iters: 30,
                ..SolveOptions::default()
            }),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PoseError {
    #[error("{object} object points but {image} image points")]
    LengthMismatch { object: usize, image: usize },
    #[error("need at least 4 correspondences, got {0}")]
    TooFewPoints(usize),
    #[error("object points must lie on the z = 0 plane")]
    NonPlanar,
    #[error("no pose hypothesis reached the inlier minimum")]
    NotFound,
    #[error(transparent)]
    Refinement(#[from] SolveError),
}

#[derive(Clone, Debug)]
pub struct PnpResult {
    pub pose: Pose,
    /// Indices of the correspondences consistent with `pose`.
    pub inliers: Vec<usize>,
    /// RMS pixel reprojection error over the inliers.
    pub rms_error: f64,
    pub ransac_iterations: usize,
}

#[derive(Clone, Copy, Debug)]
struct Correspondence {
    object: Point3<f64>,
    plane: Point2<f64>,
    /// Undistorted normalized image coordinates.
    normalized: Point2<f64>,
    pixel: Point2<f64>,
}

struct PlanarPoseEstimator<'a> {
    camera: &'a CameraModel,
}

fn pose_from_plane_to_normalized(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Pose> {
    let h = estimate_homography(src, dst)?;
    pose_from_homography(&Matrix3::identity(), &h.h)
}

impl Estimator for PlanarPoseEstimator<'_> {
    type Datum = Correspondence;
    type Model = Pose;
    const MIN_SAMPLES: usize = 4;

    fn fit(&self, data: &[Correspondence], sample: &[usize]) -> Option<Pose> {
        let src: [Point2<f64>; 4] = std::array::from_fn(|k| data[sample[k]].plane);
        let dst: [Point2<f64>; 4] = std::array::from_fn(|k| data[sample[k]].normalized);
        let h = homography_from_4pt(&src, &dst)?;
        pose_from_homography(&Matrix3::identity(), &h.h)
    }

    fn residual(&self, pose: &Pose, d: &Correspondence) -> f64 {
        match self.camera.project(pose, &d.object) {
            Some(p) => (p - d.pixel).norm(),
            None => f64::INFINITY,
        }
    }

    // Any three collinear board points make the minimal homography singular.
    fn is_degenerate(&self, data: &[Correspondence], sample: &[usize]) -> bool {
        let p: Vec<Point2<f64>> = sample.iter().map(|&i| data[i].plane).collect();
        let scale = p
            .iter()
            .flat_map(|a| p.iter().map(move |b| (a - b).norm_squared()))
            .fold(0.0, f64::max);
        if scale <= 0.0 {
            return true;
        }
        for a in 0..p.len() {
            for b in a + 1..p.len() {
                for c in b + 1..p.len() {
                    let (u, v) = (p[b] - p[a], p[c] - p[a]);
                    if (u.x * v.y - u.y * v.x).abs() <= 1e-6 * scale {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn refit(&self, data: &[Correspondence], inliers: &[usize]) -> Option<Pose> {
        let src: Vec<Point2<f64>> = inliers.iter().map(|&i| data[i].plane).collect();
        let dst: Vec<Point2<f64>> = inliers.iter().map(|&i| data[i].normalized).collect();
        pose_from_plane_to_normalized(&src, &dst)
    }
}

struct PoseProblem<'a> {
    camera: &'a CameraModel,
    data: &'a [Correspondence],
    inliers: &'a [usize],
}

impl NllsProblem for PoseProblem<'_> {
    fn num_params(&self) -> usize {
        6
    }

    fn num_residuals(&self) -> usize {
        2 * self.inliers.len()
    }

    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        let pose = Pose::from_params(params.as_slice());
        let mut out = DVector::zeros(self.num_residuals());
        for (k, &i) in self.inliers.iter().enumerate() {
            let d = &self.data[i];
            let p = self
                .camera
                .project_camera_point(&pose.transform_point(&d.object).coords);
            out[2 * k] = p.x - d.pixel.x;
            out[2 * k + 1] = p.y - d.pixel.y;
        }
        out
    }

    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        let pose = Pose::from_params(params.as_slice());
        let mut jac = DMatrix::zeros(self.num_residuals(), 6);
        for (k, &i) in self.inliers.iter().enumerate() {
            let object = &self.data[i].object;
            let pj = self
                .camera
                .project_with_jacobian(&pose.transform_point(object).coords);
            let block = pj.d_point * Pose::params_jacobian(params.as_slice(), object);
            jac.fixed_view_mut::<2, 6>(2 * k, 0).copy_from(&block);
        }
        jac
    }
}

fn inlier_rms(est: &PlanarPoseEstimator<'_>, pose: &Pose, data: &[Correspondence], inliers: &[usize]) -> f64 {
    let ss: f64 = inliers
        .iter()
        .map(|&i| est.residual(pose, &data[i]).powi(2))
        .sum();
    (ss / inliers.len().max(1) as f64).sqrt()
}

/// Pose of a planar target (`z = 0`) seen by a calibrated camera.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(points = object_points.len()))
)]
pub fn solve_pnp_ransac(
    object_points: &[Point3<f64>],
    image_points: &[Point2<f64>],
    camera: &CameraModel,
    params: &PnpRansacParams,
) -> Result<PnpResult, PoseError> {
    if object_points.len() != image_points.len() {
        return Err(PoseError::LengthMismatch {
            object: object_points.len(),
            image: image_points.len(),
        });
    }
    if object_points.len() < PlanarPoseEstimator::MIN_SAMPLES {
        return Err(PoseError::TooFewPoints(object_points.len()));
    }
    if object_points.iter().any(|p| p.z.abs() > 1e-9) {
        return Err(PoseError::NonPlanar);
    }

    let data: Vec<Correspondence> = object_points
        .iter()
        .zip(image_points)
        .map(|(o, px)| {
            let n = camera.normalize(px);
            Correspondence {
                object: *o,
                plane: Point2::new(o.x, o.y),
                normalized: Point2::new(n.x, n.y),
                pixel: *px,
            }
        })
        .collect();

    let est = PlanarPoseEstimator { camera };
    let opts = RansacOptions {
        max_iters: params.max_iterations,
        thresh: params.reprojection_threshold,
        min_inliers: params.min_inliers.max(PlanarPoseEstimator::MIN_SAMPLES),
        confidence: params.confidence,
        seed: params.seed,
        refit_on_inliers: true,
    };
    let res = ransac(&est, &data, &opts);
    let Some(mut pose) = res.model.filter(|_| res.success) else {
        return Err(PoseError::NotFound);
    };
    trace!(
        "pnp ransac: {} / {} inliers after {} iterations",
        res.inliers.len(),
        data.len(),
        res.iters
    );

    if let Some(opts) = &params.refine {
        let problem = PoseProblem {
            camera,
            data: &data,
            inliers: &res.inliers,
        };
        let (x, _) = minimize(&problem, DVector::from_row_slice(&pose.to_params()), opts)?;
        let refined = Pose::from_params(x.as_slice());
        if inlier_rms(&est, &refined, &data, &res.inliers) <= inlier_rms(&est, &pose, &data, &res.inliers) {
            pose = refined;
        }
    }

    Ok(PnpResult {
        pose,
        rms_error: inlier_rms(&est, &pose, &data, &res.inliers),
        inliers: res.inliers,
        ransac_iterations: res.iters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use calib_ar_core::Intrinsics;

    #[test]
    fn collinear_samples_are_degenerate() {
        let camera = CameraModel::pinhole(Intrinsics::new(500.0, 500.0, 320.0, 240.0));
        let est = PlanarPoseEstimator { camera: &camera };
        let data: Vec<Correspondence> = [(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (0.0, 1.0), (1.0, 1.0)]
            .iter()
            .map(|&(x, y)| Correspondence {
                object: Point3::new(x, y, 0.0),
                plane: Point2::new(x, y),
                normalized: Point2::new(x, y),
                pixel: Point2::new(x, y),
            })
            .collect();
        assert!(est.is_degenerate(&data, &[0, 1, 2, 3]));
        assert!(!est.is_degenerate(&data, &[0, 1, 3, 4]));
    }

    #[test]
    fn refinement_jacobian_matches_finite_differences() {
        let camera = CameraModel::new(
            Intrinsics::new(600.0, 610.0, 320.0, 240.0),
            calib_ar_core::BrownConrady::from_coeffs([-0.15, 0.03, 0.0, 0.001, 0.0]),
        );
        let data: Vec<Correspondence> = [(0.0, 0.0), (3.0, 0.0), (0.0, 2.0), (3.0, 2.0), (1.0, 1.0)]
            .iter()
            .map(|&(x, y)| Correspondence {
                object: Point3::new(x, y, 0.0),
                plane: Point2::new(x, y),
                normalized: Point2::origin(),
                pixel: Point2::new(300.0 + 10.0 * x, 200.0 + 12.0 * y),
            })
            .collect();
        let inliers: Vec<usize> = (0..data.len()).collect();
        let problem = PoseProblem {
            camera: &camera,
            data: &data,
            inliers: &inliers,
        };
        let x = DVector::from_vec(vec![0.3, -0.2, 0.1, -1.0, -0.5, 10.0]);
        let jac = problem.jacobian(&x);
        for k in 0..6 {
            let h = 1e-6;
            let (mut plus, mut minus) = (x.clone(), x.clone());
            plus[k] += h;
            minus[k] -= h;
            let num = (problem.residuals(&plus) - problem.residuals(&minus)) / (2.0 * h);
            assert!((num - jac.column(k)).amax() < 1e-4, "column {k}");
        }
    }

    #[test]
    fn input_validation() {
        let camera = CameraModel::pinhole(Intrinsics::new(500.0, 500.0, 320.0, 240.0));
        let obj = [Point3::new(0.0, 0.0, 0.0); 3];
        let img = [Point2::new(0.0, 0.0); 3];
        let p = PnpRansacParams::default();
        assert_eq!(
            solve_pnp_ransac(&obj, &img[..2], &camera, &p).unwrap_err(),
            PoseError::LengthMismatch { object: 3, image: 2 }
        );
        assert_eq!(
            solve_pnp_ransac(&obj, &img, &camera, &p).unwrap_err(),
            PoseError::TooFewPoints(3)
        );
        let lifted = [Point3::new(0.0, 0.0, 1.0); 4];
        assert_eq!(
            solve_pnp_ransac(&lifted, &[Point2::new(0.0, 0.0); 4], &camera, &p).unwrap_err(),
            PoseError::NonPlanar
        );
    }
}
