use calib_ar::core::synthetic::{board_facing_pose, render_checkerboard, LIGHT};
use calib_ar::solver::CalibrationError;
use calib_ar::{
    AccumulatorParams, ArPipeline, DisplaySink, FrameLoop, FrameOutcome, FrameSink, FrameSource,
    HeadlessDisplay, PipelineConfig, PipelineState, PngSequenceSink, RecordMode, ScriptedCommands,
    SinkError, SourceError, StopReason, SyntheticSource, SyntheticSourceParams,
};
use image::{DynamicImage, RgbImage};
use std::cell::Cell;
use std::rc::Rc;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn every_frame() -> PipelineConfig {
    PipelineConfig {
        accumulator: AccumulatorParams { sampling_period: 1 },
        ..Default::default()
    }
}

fn stream(frames: u64) -> SyntheticSourceParams {
    SyntheticSourceParams {
        frames,
        hold_frames: 1,
        ..Default::default()
    }
}

fn to_rgb(gray: calib_ar::core::GrayImage) -> RgbImage {
    let buf = image::GrayImage::from_raw(gray.width as u32, gray.height as u32, gray.data).unwrap();
    DynamicImage::ImageLuma8(buf).into_rgb8()
}

/// Feed every synthetic view once and calibrate.
fn calibrated_pipeline() -> (ArPipeline, SyntheticSource) {
    calibrated_with(every_frame())
}

fn calibrated_with(config: PipelineConfig) -> (ArPipeline, SyntheticSource) {
    let mut pipeline = ArPipeline::new(config).unwrap();
    let mut source = SyntheticSource::new(*pipeline.pattern(), stream(7));
    while let Some(frame) = source.read_frame().unwrap() {
        pipeline.process_frame(&frame);
    }
    assert!(pipeline.accumulator().len() >= 3, "too few views detected");
    pipeline.calibrate((640, 480)).expect("calibration");
    (pipeline, source)
}

#[test]
fn calibrates_then_tracks_the_board() {
    init_logs();
    let pipeline = ArPipeline::new(every_frame()).unwrap();
    let source = SyntheticSource::new(*pipeline.pattern(), stream(10));
    let truth = *source.camera();

    let mut frame_loop = FrameLoop::new(
        pipeline,
        Box::new(source),
        Box::new(HeadlessDisplay::new()),
        Box::new(ScriptedCommands::from_frame_counts(Some(8), None)),
    );
    let summary = frame_loop.run().unwrap();

    assert_eq!(summary.frames, 10);
    assert_eq!(summary.stop_reason, StopReason::EndOfStream);
    assert_eq!(summary.final_state, PipelineState::Calibrated);
    assert!(summary.samples_retained >= 3, "{summary:?}");
    assert!(summary.poses_found >= 2, "{summary:?}");

    let camera = frame_loop.pipeline().camera().expect("calibrated");
    let fx = camera.intrinsics.fx;
    assert!((fx - truth.intrinsics.fx).abs() / truth.intrinsics.fx < 0.02, "fx = {fx}");
}

#[test]
fn default_stream_calibrates_from_its_first_retained_view() {
    init_logs();
    let pipeline = ArPipeline::new(PipelineConfig::default()).unwrap();
    let params = SyntheticSourceParams {
        frames: 34,
        ..Default::default()
    };
    let source = SyntheticSource::new(*pipeline.pattern(), params);

    let mut frame_loop = FrameLoop::new(
        pipeline,
        Box::new(source),
        Box::new(HeadlessDisplay::new()),
        Box::new(ScriptedCommands::from_frame_counts(Some(31), None)),
    );
    let summary = frame_loop.run().unwrap();

    assert_eq!(summary.samples_retained, 1, "{summary:?}");
    assert_eq!(summary.final_state, PipelineState::Calibrated, "{summary:?}");
    let camera = frame_loop.pipeline().camera().expect("calibrated");
    assert!(camera.intrinsics.is_finite());
    assert_eq!((camera.intrinsics.cx, camera.intrinsics.cy), (319.5, 239.5));
}

#[test]
fn calibration_without_samples_keeps_collecting() {
    let mut pipeline = ArPipeline::new(PipelineConfig::default()).unwrap();
    assert_eq!(
        pipeline.calibrate((640, 480)).unwrap_err(),
        CalibrationError::InsufficientSamples
    );
    assert_eq!(pipeline.state(), PipelineState::Collecting);

    let source = SyntheticSource::new(*pipeline.pattern(), stream(3));
    let mut frame_loop = FrameLoop::new(
        pipeline,
        Box::new(source),
        Box::new(HeadlessDisplay::new()),
        Box::new(ScriptedCommands::from_frame_counts(Some(1), None)),
    );
    let summary = frame_loop.run().unwrap();
    assert_eq!(summary.final_state, PipelineState::Collecting);
    assert_eq!(summary.samples_retained, 0);
}

#[test]
fn retained_frames_are_shown_inverted() {
    let config = PipelineConfig {
        accumulator: AccumulatorParams { sampling_period: 2 },
        ..Default::default()
    };
    let mut pipeline = ArPipeline::new(config).unwrap();
    let mut source = SyntheticSource::new(*pipeline.pattern(), stream(1));
    let frame = source.read_frame().unwrap().unwrap();

    let first = pipeline.process_frame(&frame);
    assert_eq!(first.outcome, FrameOutcome::BoardDetected { retained: false });
    assert_eq!(first.composited.get_pixel(0, 0).0, [LIGHT; 3]);
    assert_ne!(first.composited, frame);

    let second = pipeline.process_frame(&frame);
    assert_eq!(second.outcome, FrameOutcome::BoardDetected { retained: true });
    assert_eq!(second.composited.get_pixel(0, 0).0, [!LIGHT; 3]);
    assert_eq!(pipeline.accumulator().len(), 1);
}

#[test]
fn blank_frame_has_no_board() {
    let mut pipeline = ArPipeline::new(PipelineConfig::default()).unwrap();
    let frame = RgbImage::from_pixel(320, 240, image::Rgb([128, 128, 128]));
    let result = pipeline.process_frame(&frame);
    assert_eq!(result.outcome, FrameOutcome::NoBoardDetected);
    assert_eq!(pipeline.accumulator().detections(), 0);
}

#[test]
fn pose_of_a_new_view_matches_the_rendered_one() {
    let (mut pipeline, source) = calibrated_pipeline();
    assert_eq!(pipeline.state(), PipelineState::Calibrated);

    let pose = board_facing_pose(pipeline.pattern(), 0.15, -0.2, 0.1, 11.0);
    let frame = to_rgb(render_checkerboard(source.camera(), &pose, pipeline.pattern(), 640, 480, 2));
    let result = pipeline.process_frame(&frame);

    let (found, vertices) = match result.outcome {
        FrameOutcome::PoseFound { pose, vertices } => (pose, vertices),
        other => panic!("expected a pose, got {other:?}"),
    };
    assert!(found.rotation_angle_to(&pose) < 0.02);
    assert!((found.translation - pose.translation).norm() < 0.2);
    assert_eq!(vertices.len(), 8);
    assert!(vertices.is_finite());
    assert_ne!(result.composited, frame);

    // Further calibrate requests leave the model untouched.
    let before = *pipeline.camera().unwrap();
    pipeline.calibrate((640, 480)).unwrap();
    assert_eq!(*pipeline.camera().unwrap(), before);
}

#[test]
fn frame_without_a_pose_is_shown_without_the_cube() {
    let mut config = every_frame();
    config.pnp.min_inliers = 1000;
    let (mut pipeline, _) = calibrated_with(config);
    assert_eq!(pipeline.state(), PipelineState::Calibrated);

    let mut source = SyntheticSource::new(*pipeline.pattern(), stream(1));
    let frame = source.read_frame().unwrap().unwrap();
    let result = pipeline.process_frame(&frame);

    assert_eq!(result.outcome, FrameOutcome::PoseNotFound);
    assert_eq!(result.composited, frame);
    assert_eq!(pipeline.state(), PipelineState::Calibrated);
}

#[test]
fn records_raw_frames_until_quit() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = ArPipeline::new(PipelineConfig::default()).unwrap();
    let params = SyntheticSourceParams {
        frames: 10,
        width: 160,
        height: 120,
        focal: 150.0,
        supersample: 1,
        ..Default::default()
    };
    let source = SyntheticSource::new(*pipeline.pattern(), params);
    let recorder = PngSequenceSink::create(dir.path()).unwrap();

    let mut frame_loop = FrameLoop::new(
        pipeline,
        Box::new(source),
        Box::new(HeadlessDisplay::new()),
        Box::new(ScriptedCommands::from_frame_counts(None, Some(3))),
    )
    .with_recorder(Box::new(recorder), RecordMode::Raw);
    let summary = frame_loop.run().unwrap();

    assert_eq!(summary.stop_reason, StopReason::Quit);
    assert_eq!(summary.frames, 3);
    assert_eq!(summary.frames_recorded, 2);
    assert!(dir.path().join("frame_000001.png").exists());
    assert!(!dir.path().join("frame_000002.png").exists());
}

struct TrackedSource {
    inner: SyntheticSource,
    released: Rc<Cell<bool>>,
}

impl FrameSource for TrackedSource {
    fn read_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        self.inner.read_frame()
    }

    fn release(&mut self) {
        self.released.set(true);
        self.inner.release();
    }
}

struct BrokenSink;

impl FrameSink for BrokenSink {
    fn write_frame(&mut self, _frame: &RgbImage) -> Result<(), SinkError> {
        Err(SinkError::CreateDir {
            path: "/nowhere".into(),
            source: std::io::Error::other("disk full"),
        })
    }

    fn release(&mut self) {}
}

struct TrackedDisplay(Rc<Cell<bool>>);

impl DisplaySink for TrackedDisplay {
    fn show_frame(&mut self, _frame: &RgbImage) -> Result<(), SinkError> {
        Ok(())
    }

    fn release(&mut self) {
        self.0.set(true);
    }
}

#[test]
fn resources_are_released_when_recording_fails() {
    let pipeline = ArPipeline::new(PipelineConfig::default()).unwrap();
    let source_released = Rc::new(Cell::new(false));
    let display_released = Rc::new(Cell::new(false));
    let params = SyntheticSourceParams {
        frames: 5,
        width: 64,
        height: 48,
        focal: 60.0,
        supersample: 1,
        ..Default::default()
    };
    let source = TrackedSource {
        inner: SyntheticSource::new(*pipeline.pattern(), params),
        released: Rc::clone(&source_released),
    };

    let mut frame_loop = FrameLoop::new(
        pipeline,
        Box::new(source),
        Box::new(TrackedDisplay(Rc::clone(&display_released))),
        Box::new(ScriptedCommands::default()),
    )
    .with_recorder(Box::new(BrokenSink), RecordMode::Composited);

    assert!(frame_loop.run().is_err());
    assert!(source_released.get());
    assert!(display_released.get());
}
