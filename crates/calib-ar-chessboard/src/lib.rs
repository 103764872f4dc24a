//! Full-grid checkerboard detector built on top of `calib-ar-core`.
//!
//! Pipeline:
//! 1. ChESS X-junction candidates from `chess-corners`, optionally on a
//!    downscaled copy of the frame.
//! 2. Lattice assembly: a seed with a cross-shaped neighbourhood, then
//!    breadth-first growth predicting each neighbour from the local lattice
//!    step (kd-tree lookups via `kiddo`).
//! 3. Acceptance only for a fully populated `columns x rows` lattice (either
//!    orientation), laid out row-major with positive handedness and corner 0
//!    nearest the image origin.
//! 4. Gradient-orthogonality sub-pixel refinement at full resolution.
//!
//! The detector is a pure function of the frame.

mod detector;
mod lattice;
mod params;
mod subpix;

pub use detector::{detect_chessboard, Candidate, ChessboardDetector, DetectionOutcome};
pub use lattice::{order_row_major, Lattice, LatticeBuilder, SeedCross};
pub use params::{ChessCornerParams, ChessboardParams, LatticeParams, SubPixParams};
pub use subpix::{refine_corner, refine_corners};
