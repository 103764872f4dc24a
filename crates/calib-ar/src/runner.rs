//! The frame loop.
//!
//! One frame at a time: read, poll the user, maybe calibrate, record, process,
//! display. Source, recorder and display are released on every exit path.

use crate::command::{CommandSource, UserCommand};
use crate::pipeline::{ArPipeline, FrameOutcome, PipelineState};
use crate::sink::{DisplaySink, FrameSink, SinkError};
use crate::source::FrameSource;
use calib_ar_solver::CalibrationError;
use log::{debug, error, info, warn};

/// What the recorder receives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecordMode {
    /// The frames as read from the source.
    #[default]
    Raw,
    /// The frames with the overlays applied.
    Composited,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    Quit,
}

/// Counters reported when the loop ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub detections: u64,
    pub samples_retained: usize,
    pub poses_found: u64,
    pub poses_not_found: u64,
    pub frames_recorded: u64,
    pub final_state: PipelineState,
    pub stop_reason: StopReason,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            frames: 0,
            detections: 0,
            samples_retained: 0,
            poses_found: 0,
            poses_not_found: 0,
            frames_recorded: 0,
            final_state: PipelineState::Collecting,
            stop_reason: StopReason::EndOfStream,
        }
    }
}

/// Owns the pipeline and its collaborators for one session.
pub struct FrameLoop {
    pipeline: ArPipeline,
    source: Box<dyn FrameSource>,
    recorder: Option<Box<dyn FrameSink>>,
    record_mode: RecordMode,
    display: Box<dyn DisplaySink>,
    commands: Box<dyn CommandSource>,
}

impl FrameLoop {
    pub fn new(
        pipeline: ArPipeline,
        source: Box<dyn FrameSource>,
        display: Box<dyn DisplaySink>,
        commands: Box<dyn CommandSource>,
    ) -> Self {
        Self {
            pipeline,
            source,
            recorder: None,
            record_mode: RecordMode::Raw,
            display,
            commands,
        }
    }

    pub fn with_recorder(mut self, recorder: Box<dyn FrameSink>, mode: RecordMode) -> Self {
        self.recorder = Some(recorder);
        self.record_mode = mode;
        self
    }

    pub fn pipeline(&self) -> &ArPipeline {
        &self.pipeline
    }

    /// Run until quit or end of stream, then release every resource.
    pub fn run(&mut self) -> Result<RunSummary, SinkError> {
        let mut summary = RunSummary::new();
        let result = self.run_frames(&mut summary);

        self.source.release();
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.release();
        }
        self.display.release();

        summary.samples_retained = self.pipeline.accumulator().len();
        summary.final_state = self.pipeline.state();
        result.map(|()| summary)
    }

    fn run_frames(&mut self, summary: &mut RunSummary) -> Result<(), SinkError> {
        loop {
            let frame = match self.source.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("end of stream after {} frames", summary.frames);
                    return Ok(());
                }
                Err(e) => {
                    warn!("{e}, treating as end of stream");
                    return Ok(());
                }
            };
            summary.frames += 1;

            match self.commands.poll() {
                UserCommand::Quit => {
                    info!("quit requested, closing...");
                    summary.stop_reason = StopReason::Quit;
                    return Ok(());
                }
                UserCommand::Calibrate if self.pipeline.state() == PipelineState::Collecting => {
                    self.calibrate(frame.dimensions());
                }
                UserCommand::Calibrate => debug!("already calibrated, ignoring calibrate command"),
                UserCommand::None => {}
            }

            if self.record_mode == RecordMode::Raw {
                if let Some(recorder) = self.recorder.as_mut() {
                    recorder.write_frame(&frame)?;
                    summary.frames_recorded += 1;
                }
            }

            let result = self.pipeline.process_frame(&frame);
            match &result.outcome {
                FrameOutcome::NoBoardDetected => {}
                FrameOutcome::BoardDetected { .. } => summary.detections += 1,
                FrameOutcome::PoseFound { .. } => {
                    summary.detections += 1;
                    summary.poses_found += 1;
                }
                FrameOutcome::PoseNotFound => {
                    summary.detections += 1;
                    summary.poses_not_found += 1;
                }
            }

            if self.record_mode == RecordMode::Composited {
                if let Some(recorder) = self.recorder.as_mut() {
                    recorder.write_frame(&result.composited)?;
                    summary.frames_recorded += 1;
                }
            }
            self.display.show_frame(&result.composited)?;
        }
    }

    fn calibrate(&mut self, resolution: (u32, u32)) {
        let samples = self.pipeline.accumulator().len();
        match self.pipeline.calibrate(resolution) {
            Ok(result) => {
                let k = result.camera.intrinsic_matrix();
                info!("calibration done from {samples} sample(s)");
                info!("estimated distortion {:?}", result.camera.distortion_coeffs());
                info!("estimated intrinsics matrix {k}");
                info!(
                    "reprojection error: rms {:.4} px, mean {:.4} px",
                    result.rms_error, result.mean_error
                );
            }
            Err(CalibrationError::InsufficientSamples) => {
                warn!("no calibration samples yet, keep waving the board");
            }
            Err(e) => error!("calibration failed: {e}"),
        }
    }
}
