//! Calibration and pose solvers for planar checkerboard tracking.
//!
//! - [`calibrate`]: intrinsics + Brown–Conrady distortion from retained board
//!   views (closed-form initialisation, joint Levenberg–Marquardt refinement),
//! - [`solve_pnp_ransac`]: robust per-frame board pose for a calibrated camera,
//! - [`ransac`] and [`minimize`]: the generic engines both are built on.

mod calibrate;
mod init;
mod optim;
mod pnp;
mod ransac;

pub use calibrate::{
    calibrate, reprojection_errors, CalibrationError, CalibrationOptions, CalibrationResult,
    CalibrationSample,
};
pub use init::{focal_with_principal_point, pose_from_homography, zhang_intrinsics};
pub use optim::{minimize, NllsProblem, SolveError, SolveOptions, SolveReport};
pub use pnp::{solve_pnp_ransac, PnpRansacParams, PnpResult, PoseError};
pub use ransac::{ransac, Estimator, RansacOptions, RansacResult};
