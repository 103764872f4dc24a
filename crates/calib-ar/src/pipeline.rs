//! Per-frame orchestration: detection, sample collection, calibration, pose
//! and compositing.

use crate::accumulator::SampleAccumulator;
use crate::compositor::{compose, CandidateMarkers, CornerGrid, Draw, InvertColors, Wireframe};
use crate::config::PipelineConfig;
use crate::projector::{ArObject, ProjectedVertices};
use calib_ar_chessboard::{ChessboardDetector, DetectionOutcome};
use calib_ar_core::{CameraModel, CheckerboardSpec, GrayImageView, PatternError, Pose};
use calib_ar_solver::{
    calibrate, solve_pnp_ransac, CalibrationError, CalibrationResult, PoseError,
};
use image::RgbImage;
use log::{debug, info};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    /// Gathering samples; no camera model yet.
    Collecting,
    /// Camera model fixed for the rest of the session.
    Calibrated,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    NoBoardDetected,
    BoardDetected { retained: bool },
    PoseFound { pose: Pose, vertices: ProjectedVertices },
    PoseNotFound,
}

/// Result of one processed frame.
#[derive(Clone, Debug)]
pub struct FrameResult {
    pub outcome: FrameOutcome,
    /// The input frame with the overlays applied.
    pub composited: RgbImage,
}

/// Calibration + AR state machine over individual frames.
pub struct ArPipeline {
    pattern: CheckerboardSpec,
    config: PipelineConfig,
    detector: ChessboardDetector,
    accumulator: SampleAccumulator,
    object: ArObject,
    calibration: Option<CalibrationResult>,
}

impl ArPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PatternError> {
        let pattern = config.pattern()?;
        Ok(Self {
            detector: ChessboardDetector::new(pattern, config.detector.clone()),
            accumulator: SampleAccumulator::new(pattern, config.accumulator.clone()),
            object: ArObject::cube(config.cube_side * pattern.square_size()),
            pattern,
            config,
            calibration: None,
        })
    }

    pub fn state(&self) -> PipelineState {
        if self.calibration.is_some() {
            PipelineState::Calibrated
        } else {
            PipelineState::Collecting
        }
    }

    pub fn pattern(&self) -> &CheckerboardSpec {
        &self.pattern
    }

    pub fn camera(&self) -> Option<&CameraModel> {
        self.calibration.as_ref().map(|c| &c.camera)
    }

    pub fn calibration(&self) -> Option<&CalibrationResult> {
        self.calibration.as_ref()
    }

    pub fn accumulator(&self) -> &SampleAccumulator {
        &self.accumulator
    }

    pub fn object(&self) -> &ArObject {
        &self.object
    }

    /// Solve for the camera from every retained sample.
    ///
    /// On failure the pipeline keeps collecting. Once calibrated, further
    /// requests return the existing result.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub fn calibrate(&mut self, resolution: (u32, u32)) -> Result<&CalibrationResult, CalibrationError> {
        if self.calibration.is_none() {
            let result = calibrate(
                self.accumulator.samples(),
                resolution,
                &self.config.calibration,
            )?;
            self.calibration = Some(result);
        }
        self.calibration.as_ref().ok_or(CalibrationError::InsufficientSamples)
    }

    /// Detect the board, update the state machine and compose the output frame.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(width = frame.width(), height = frame.height()))
    )]
    pub fn process_frame(&mut self, frame: &RgbImage) -> FrameResult {
        let resolution = frame.dimensions();
        let gray = image::imageops::grayscale(frame);
        let view = GrayImageView {
            width: gray.width() as usize,
            height: gray.height() as usize,
            data: gray.as_raw(),
        };

        let corners = match self.detector.detect(&view) {
            DetectionOutcome::Found(corners) => corners,
            DetectionOutcome::NotFound { candidates } => {
                debug!("board not found ({} candidates)", candidates.len());
                return FrameResult {
                    outcome: FrameOutcome::NoBoardDetected,
                    composited: compose(frame, &[&CandidateMarkers { points: &candidates }]),
                };
            }
        };

        let Some(calibration) = &self.calibration else {
            let retained = self.accumulator.consider_frame(&corners, resolution);
            let grid = CornerGrid { corners: &corners };
            let mut layers: Vec<&dyn Draw> = Vec::with_capacity(2);
            if retained {
                layers.push(&InvertColors);
            }
            layers.push(&grid);
            return FrameResult {
                outcome: FrameOutcome::BoardDetected { retained },
                composited: compose(frame, &layers),
            };
        };

        let camera = &calibration.camera;
        match solve_pnp_ransac(
            &self.pattern.object_points(),
            corners.points(),
            camera,
            &self.config.pnp,
        ) {
            Ok(pnp) => {
                let vertices = self.object.project(camera, &pnp.pose);
                let composited = compose(frame, &[&Wireframe::new(&vertices)]);
                FrameResult {
                    outcome: FrameOutcome::PoseFound {
                        pose: pnp.pose,
                        vertices,
                    },
                    composited,
                }
            }
            Err(e) => {
                log_pose_failure(&e);
                FrameResult {
                    outcome: FrameOutcome::PoseNotFound,
                    composited: frame.clone(),
                }
            }
        }
    }
}

fn log_pose_failure(e: &PoseError) {
    match e {
        PoseError::NotFound => debug!("pose not found"),
        other => info!("pose estimation failed: {other}"),
    }
}
