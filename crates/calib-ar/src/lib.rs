//! Live checkerboard calibration and augmented-reality pose pipeline.
//!
//! This crate ties the workspace together:
//! - re-exports of the building blocks (`core`, `chessboard`, `solver`),
//! - [`SampleAccumulator`]: which detections become calibration samples,
//! - [`ArPipeline`]: the `Collecting -> Calibrated` state machine applied to
//!   one frame at a time, producing a [`FrameOutcome`] and a composited frame,
//! - [`FrameLoop`]: read / poll / calibrate / record / process / display over
//!   pluggable [`FrameSource`], [`FrameSink`], [`DisplaySink`] and
//!   [`CommandSource`] implementations,
//! - [`AppConfig`]: serde configuration, with clap flags behind the `cli`
//!   feature.
//!
//! ## Quickstart
//!
//! ```no_run
//! use calib_ar::{ArPipeline, PipelineConfig, FrameOutcome};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut pipeline = ArPipeline::new(PipelineConfig::default())?;
//! let frame = image::open("frame.png")?.into_rgb8();
//! let result = pipeline.process_frame(&frame);
//! if let FrameOutcome::BoardDetected { retained } = result.outcome {
//!     println!("board found, kept for calibration: {retained}");
//! }
//! # Ok(())
//! # }
//! ```

pub use calib_ar_chessboard as chessboard;
pub use calib_ar_core as core;
pub use calib_ar_solver as solver;

mod accumulator;
mod app;
mod command;
mod compositor;
mod config;
mod draw;
mod pipeline;
mod projector;
mod runner;
mod sink;
mod source;

pub use accumulator::{AccumulatorParams, SampleAccumulator};
pub use app::{build_frame_loop, open_source, run_app, AppError, INSTRUCTIONS};
pub use command::{
    CombinedCommands, CommandSource, InterruptCommands, ScriptedCommands, StdinCommands,
    UserCommand,
};
pub use compositor::{
    compose, CandidateMarkers, CornerGrid, Draw, InvertColors, Wireframe, CUBE_EDGES,
};
pub use config::{AppConfig, ConfigError, LogLevel, PipelineConfig};
pub use draw::{draw_circle, draw_line, invert};
pub use pipeline::{ArPipeline, FrameOutcome, FrameResult, PipelineState};
pub use projector::{ArObject, ProjectedVertices};
pub use runner::{FrameLoop, RecordMode, RunSummary, StopReason};
pub use sink::{DisplaySink, FrameSink, HeadlessDisplay, PngSequenceSink, SinkError};
pub use source::{
    FrameSource, ImageSequenceSource, SourceError, SyntheticSource, SyntheticSourceParams,
};

#[cfg(feature = "cli")]
pub use config::CliArgs;
