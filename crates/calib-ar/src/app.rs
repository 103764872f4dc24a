//! Session setup from an [`AppConfig`].

use crate::command::CommandSource;
use crate::config::{AppConfig, ConfigError};
use crate::pipeline::ArPipeline;
use crate::runner::{FrameLoop, RecordMode, RunSummary};
use crate::sink::{FrameSink, HeadlessDisplay, PngSequenceSink, SinkError};
use crate::source::{FrameSource, ImageSequenceSource, SourceError, SyntheticSource};
use calib_ar_core::PatternError;
use log::info;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("cannot install the interrupt handler")]
    Interrupt(#[from] ctrlc::Error),
}

/// Printed once at startup.
pub const INSTRUCTIONS: &str = "Wave the calibration checkerboard at the camera for a few frames, \
then type c + Enter to calibrate and see the AR cube on the checkerboard.\n\
Type q + Enter (or press Ctrl-C) to close.";

/// The configured input, or the synthetic board stream when none is given.
pub fn open_source(config: &AppConfig) -> Result<Box<dyn FrameSource>, AppError> {
    match &config.video_file {
        Some(path) => Ok(Box::new(ImageSequenceSource::open(path)?)),
        None => {
            info!("no input given, using the synthetic board stream");
            let pattern = config.pipeline.pattern()?;
            Ok(Box::new(SyntheticSource::new(pattern, config.synthetic.clone())))
        }
    }
}

/// Build the frame loop described by `config`.
pub fn build_frame_loop(
    config: &AppConfig,
    commands: Box<dyn CommandSource>,
) -> Result<FrameLoop, AppError> {
    config.validate()?;
    let pipeline = ArPipeline::new(config.pipeline.clone())?;

    let object_points = pipeline.pattern().object_points();
    info!(
        "{}x{} board, {} object points",
        pipeline.pattern().columns(),
        pipeline.pattern().rows(),
        object_points.len()
    );
    for (k, p) in object_points.iter().enumerate() {
        log::debug!("object point {k}: ({}, {}, {})", p.x, p.y, p.z);
    }

    let mode = if config.record_composited {
        RecordMode::Composited
    } else {
        RecordMode::Raw
    };
    let mut recorder = match &config.output_path {
        Some(dir) => {
            info!("recording {mode:?} frames to {}", dir.display());
            Some(PngSequenceSink::create(dir)?)
        }
        None => None,
    };

    let source = match open_source(config) {
        Ok(source) => source,
        Err(e) => {
            if let Some(r) = recorder.as_mut() {
                r.release();
            }
            return Err(e);
        }
    };
    let mut frame_loop = FrameLoop::new(pipeline, source, Box::new(HeadlessDisplay::new()), commands);
    if let Some(r) = recorder {
        frame_loop = frame_loop.with_recorder(Box::new(r), mode);
    }
    Ok(frame_loop)
}

/// Set up and run one session.
pub fn run_app(config: &AppConfig, commands: Box<dyn CommandSource>) -> Result<RunSummary, AppError> {
    let mut frame_loop = build_frame_loop(config, commands)?;
    let summary = frame_loop.run()?;
    info!(
        "processed {} frames: {} detections, {} samples, {} poses, state {:?}",
        summary.frames,
        summary.detections,
        summary.samples_retained,
        summary.poses_found,
        summary.final_state
    );
    Ok(summary)
}
