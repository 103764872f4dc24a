//! Intrinsics + distortion calibration from planar board views.
//!
//! Linear initialisation (per-view homographies, Zhang's closed form or a
//! fixed principal point, homography decomposition for the poses), then a
//! joint Levenberg–Marquardt refinement of
//! `[fx, fy, cx, cy, k1, k2, p1, p2, k3]` and six pose parameters per view.
//!
//! When no linear estimate of the focal length exists (a single view facing
//! the camera squarely), the focal length starts at `max(width, height)` and
//! the principal point stays at the image centre.

use crate::init::{focal_with_principal_point, pose_from_homography, zhang_intrinsics};
use crate::optim::{minimize, NllsProblem, SolveError, SolveOptions, SolveReport};
use calib_ar_core::{
    estimate_homography, BrownConrady, CameraModel, CheckerboardSpec, CornerSet, Intrinsics, Pose,
};
use log::{debug, info};
use nalgebra::{DMatrix, DVector, Point2, Point3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// One retained view: board points, their image positions and the frame size.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationSample {
    pub object_points: Vec<Point3<f64>>,
    pub image_points: Vec<Point2<f64>>,
    /// `(width, height)` of the frame the corners were found in.
    pub resolution: (u32, u32),
}

impl CalibrationSample {
    pub fn new(
        object_points: Vec<Point3<f64>>,
        image_points: Vec<Point2<f64>>,
        resolution: (u32, u32),
    ) -> Self {
        Self {
            object_points,
            image_points,
            resolution,
        }
    }

    /// Pair a detected corner set with the pattern's object points.
    pub fn from_corners(pattern: &CheckerboardSpec, corners: &CornerSet, resolution: (u32, u32)) -> Self {
        Self::new(pattern.object_points(), corners.points().to_vec(), resolution)
    }

    pub fn len(&self) -> usize {
        self.image_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_points.is_empty()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationOptions {
    /// Below this many views the principal point stays at the image centre.
    pub min_views_for_principal_point: usize,
    /// Keep `k3` at zero.
    pub fix_k3: bool,
    pub solver: SolveOptions,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            min_views_for_principal_point: 3,
            fix_k3: false,
            solver: SolveOptions::default(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("no calibration samples collected")]
    InsufficientSamples,
    #[error("sample {index} was observed at {got:?}, working frame is {expected:?}")]
    ResolutionMismatch {
        index: usize,
        expected: (u32, u32),
        got: (u32, u32),
    },
    #[error("sample {index} is unusable: {reason}")]
    InvalidSample { index: usize, reason: &'static str },
    #[error("degenerate view configuration: {0}")]
    Degenerate(&'static str),
    #[error("calibration produced non-finite parameters")]
    NonFinite,
    #[error(transparent)]
    Solver(#[from] SolveError),
}

#[derive(Clone, Debug)]
pub struct CalibrationResult {
    pub camera: CameraModel,
    /// Board-to-camera pose of every sample, in input order.
    pub poses: Vec<Pose>,
    /// Root-mean-square reprojection error over all points (pixels).
    pub rms_error: f64,
    /// Mean Euclidean reprojection error over all points (pixels).
    pub mean_error: f64,
    pub per_view_rms: Vec<f64>,
    pub report: SolveReport,
}

/// Which parameters are free and where they live in the solver vector.
#[derive(Clone, Copy, Debug)]
struct Layout {
    fixed_principal_point: Option<(f64, f64)>,
    fix_k3: bool,
    views: usize,
}

impl Layout {
    fn intrinsics_len(&self) -> usize {
        let pp = if self.fixed_principal_point.is_some() { 0 } else { 2 };
        let dist = if self.fix_k3 { 4 } else { 5 };
        2 + pp + dist
    }

    fn len(&self) -> usize {
        self.intrinsics_len() + 6 * self.views
    }

    fn pose_offset(&self, view: usize) -> usize {
        self.intrinsics_len() + 6 * view
    }

    fn camera(&self, p: &DVector<f64>) -> CameraModel {
        let (fx, fy) = (p[0], p[1]);
        let (cx, cy, d) = match self.fixed_principal_point {
            Some((cx, cy)) => (cx, cy, 2),
            None => (p[2], p[3], 4),
        };
        let k3 = if self.fix_k3 { 0.0 } else { p[d + 4] };
        CameraModel::new(
            Intrinsics::new(fx, fy, cx, cy),
            BrownConrady::from_coeffs([p[d], p[d + 1], p[d + 2], p[d + 3], k3]),
        )
    }

    fn pose(&self, p: &DVector<f64>, view: usize) -> Pose {
        let o = self.pose_offset(view);
        Pose::from_params(&p.as_slice()[o..o + 6])
    }

    fn pack(&self, camera: &CameraModel, poses: &[Pose]) -> DVector<f64> {
        let i = &camera.intrinsics;
        let mut v = vec![i.fx, i.fy];
        if self.fixed_principal_point.is_none() {
            v.extend([i.cx, i.cy]);
        }
        let c = camera.distortion_coeffs();
        v.extend_from_slice(if self.fix_k3 { &c[..4] } else { &c[..] });
        for pose in poses {
            v.extend(pose.to_params());
        }
        DVector::from_vec(v)
    }
}

struct ReprojectionProblem<'a> {
    samples: &'a [CalibrationSample],
    layout: Layout,
    /// First residual row of every view.
    offsets: Vec<usize>,
    total: usize,
}

impl<'a> ReprojectionProblem<'a> {
    fn new(samples: &'a [CalibrationSample], layout: Layout) -> Self {
        let mut offsets = Vec::with_capacity(samples.len());
        let mut total = 0;
        for s in samples {
            offsets.push(total);
            total += 2 * s.len();
        }
        Self {
            samples,
            layout,
            offsets,
            total,
        }
    }

    fn view_residuals(&self, camera: &CameraModel, pose: &Pose, view: usize, out: &mut [f64]) {
        let s = &self.samples[view];
        for (k, (obj, img)) in s.object_points.iter().zip(&s.image_points).enumerate() {
            let proj = camera.project_camera_point(&pose.transform_point(obj).coords);
            out[2 * k] = proj.x - img.x;
            out[2 * k + 1] = proj.y - img.y;
        }
    }

    fn view_rows(&self, view: usize) -> std::ops::Range<usize> {
        let start = self.offsets[view];
        start..start + 2 * self.samples[view].len()
    }
}

impl NllsProblem for ReprojectionProblem<'_> {
    fn num_params(&self) -> usize {
        self.layout.len()
    }

    fn num_residuals(&self) -> usize {
        self.total
    }

    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        let camera = self.layout.camera(params);
        let mut out = DVector::zeros(self.total);
        let slice = out.as_mut_slice();
        for view in 0..self.samples.len() {
            let pose = self.layout.pose(params, view);
            let rows = self.view_rows(view);
            self.view_residuals(&camera, &pose, view, &mut slice[rows]);
        }
        out
    }

    // Intrinsics touch every residual; a view's pose only touches its own rows.
    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        let layout = &self.layout;
        let camera = layout.camera(params);
        let (pp_free, d) = match layout.fixed_principal_point {
            Some(_) => (false, 2),
            None => (true, 4),
        };
        let dist_cols = if layout.fix_k3 { 4 } else { 5 };

        let mut jac = DMatrix::zeros(self.total, layout.len());
        for (view, s) in self.samples.iter().enumerate() {
            let o = layout.pose_offset(view);
            let pose_params = &params.as_slice()[o..o + 6];
            let pose = Pose::from_params(pose_params);
            let row0 = self.offsets[view];
            for (k, obj) in s.object_points.iter().enumerate() {
                let pj = camera.project_with_jacobian(&pose.transform_point(obj).coords);
                let d_pose = pj.d_point * Pose::params_jacobian(pose_params, obj);
                for axis in 0..2 {
                    let r = row0 + 2 * k + axis;
                    jac[(r, 0)] = pj.d_intrinsics[(axis, 0)];
                    jac[(r, 1)] = pj.d_intrinsics[(axis, 1)];
                    if pp_free {
                        jac[(r, 2)] = pj.d_intrinsics[(axis, 2)];
                        jac[(r, 3)] = pj.d_intrinsics[(axis, 3)];
                    }
                    for c in 0..dist_cols {
                        jac[(r, d + c)] = pj.d_distortion[(axis, c)];
                    }
                    for q in 0..6 {
                        jac[(r, o + q)] = d_pose[(axis, q)];
                    }
                }
            }
        }
        jac
    }
}

fn heuristic_focal(resolution: (u32, u32)) -> f64 {
    f64::from(resolution.0.max(resolution.1))
}

// Near-degenerate views give linear focal estimates far outside this band
// around the frame size.
fn plausible_focal(f: f64, resolution: (u32, u32)) -> bool {
    let size = heuristic_focal(resolution);
    f.is_finite() && f >= 0.2 * size && f <= 20.0 * size
}

/// Per-point reprojection errors (pixels) of one view.
pub fn reprojection_errors(camera: &CameraModel, pose: &Pose, sample: &CalibrationSample) -> Vec<f64> {
    sample
        .object_points
        .iter()
        .zip(&sample.image_points)
        .map(|(obj, img)| (camera.project_camera_point(&pose.transform_point(obj).coords) - img).norm())
        .collect()
}

fn validate(samples: &[CalibrationSample], resolution: (u32, u32)) -> Result<(), CalibrationError> {
    if samples.is_empty() {
        return Err(CalibrationError::InsufficientSamples);
    }
    for (index, s) in samples.iter().enumerate() {
        if s.resolution != resolution {
            return Err(CalibrationError::ResolutionMismatch {
                index,
                expected: resolution,
                got: s.resolution,
            });
        }
        if s.object_points.len() != s.image_points.len() {
            return Err(CalibrationError::InvalidSample {
                index,
                reason: "object and image point counts differ",
            });
        }
        if s.len() < 4 {
            return Err(CalibrationError::InvalidSample {
                index,
                reason: "fewer than 4 correspondences",
            });
        }
        if s.object_points.iter().any(|p| p.z.abs() > 1e-9) {
            return Err(CalibrationError::InvalidSample {
                index,
                reason: "object points must lie on the z = 0 plane",
            });
        }
    }
    Ok(())
}

/// Calibrate from every retained sample against the working-frame resolution.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(samples, opts), fields(views = samples.len()))
)]
pub fn calibrate(
    samples: &[CalibrationSample],
    resolution: (u32, u32),
    opts: &CalibrationOptions,
) -> Result<CalibrationResult, CalibrationError> {
    validate(samples, resolution)?;

    let homographies = samples
        .iter()
        .map(|s| {
            let plane: Vec<Point2<f64>> = s.object_points.iter().map(|p| Point2::new(p.x, p.y)).collect();
            estimate_homography(&plane, &s.image_points).map(|h| h.h)
        })
        .collect::<Option<Vec<_>>>()
        .ok_or(CalibrationError::Degenerate("plane homography estimation failed"))?;

    let views = samples.len();
    let centre = (
        (resolution.0 as f64 - 1.0) * 0.5,
        (resolution.1 as f64 - 1.0) * 0.5,
    );
    let fixed_pp = views < opts.min_views_for_principal_point;

    let zhang = if fixed_pp {
        None
    } else {
        zhang_intrinsics(&homographies, resolution)
    };
    let mut hold_pp = fixed_pp;
    let intrinsics = match zhang {
        Some(intr) => intr,
        None => {
            debug!("closed-form intrinsics unavailable, holding the principal point at the image centre");
            let linear = focal_with_principal_point(&homographies, centre.0, centre.1)
                .filter(|&(fx, fy)| plausible_focal(fx, resolution) && plausible_focal(fy, resolution));
            match linear {
                Some((fx, fy)) => Intrinsics::new(fx, fy, centre.0, centre.1),
                None => {
                    let f = heuristic_focal(resolution);
                    debug!("focal length unobservable from these views, starting from {f}");
                    hold_pp = true;
                    Intrinsics::new(f, f, centre.0, centre.1)
                }
            }
        }
    };
    debug!(
        "initial intrinsics fx={:.2} fy={:.2} cx={:.2} cy={:.2}",
        intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy
    );

    let k = intrinsics.matrix();
    let poses = homographies
        .iter()
        .map(|h| pose_from_homography(&k, h))
        .collect::<Option<Vec<_>>>()
        .ok_or(CalibrationError::Degenerate("homography decomposition failed"))?;

    let layout = Layout {
        fixed_principal_point: hold_pp.then_some((intrinsics.cx, intrinsics.cy)),
        fix_k3: opts.fix_k3,
        views,
    };
    let problem = ReprojectionProblem::new(samples, layout);
    let x0 = layout.pack(&CameraModel::pinhole(intrinsics), &poses);
    let (params, report) = minimize(&problem, x0, &opts.solver)?;
    if !params.iter().all(|v| v.is_finite()) {
        return Err(CalibrationError::NonFinite);
    }

    let camera = layout.camera(&params);
    if !camera.intrinsics.is_finite() {
        return Err(CalibrationError::NonFinite);
    }
    let poses: Vec<Pose> = (0..views).map(|v| layout.pose(&params, v)).collect();

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    let per_view_rms = samples
        .iter()
        .zip(&poses)
        .map(|(s, pose)| {
            let errs = reprojection_errors(&camera, pose, s);
            let view_sq: f64 = errs.iter().map(|e| e * e).sum();
            sum += errs.iter().sum::<f64>();
            sum_sq += view_sq;
            count += errs.len();
            (view_sq / errs.len() as f64).sqrt()
        })
        .collect();
    let rms_error = (sum_sq / count as f64).sqrt();
    let mean_error = sum / count as f64;

    info!(
        "calibrated from {views} views in {} evaluations ({}): rms {rms_error:.4} px, mean {mean_error:.4} px",
        report.evaluations, report.termination
    );

    Ok(CalibrationResult {
        camera,
        poses,
        rms_error,
        mean_error,
        per_view_rms,
        report,
    })
}
