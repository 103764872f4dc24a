//! Core types and utilities for live checkerboard calibration and AR tracking.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete corner detector, solver or image codec:
//! - [`CheckerboardSpec`] / [`CornerSet`]: the planar target and its per-frame
//!   detections (row-major ordering shared by both),
//! - [`CameraModel`]: pinhole intrinsics + Brown–Conrady distortion,
//! - [`Pose`]: board-to-camera rigid transform,
//! - [`Homography`]: plane-to-image mapping with DLT estimation,
//! - [`synthetic`]: rendered boards and exact correspondences for tests and demos.

mod camera;
mod homography;
mod image;
mod logger;
mod pattern;
mod pose;
pub mod synthetic;

pub use camera::{BrownConrady, CameraModel, Intrinsics, ProjectionJacobian};
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use image::{sample_bilinear, GrayImage, GrayImageView};
pub use pattern::{CheckerboardSpec, CornerSet, PatternError};
pub use pose::Pose;

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
