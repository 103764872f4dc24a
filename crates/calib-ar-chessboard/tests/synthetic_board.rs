use calib_ar_chessboard::{ChessboardDetector, ChessboardParams, DetectionOutcome};
use calib_ar_core::synthetic::{board_facing_pose, project_pattern, render_checkerboard};
use calib_ar_core::{CameraModel, CheckerboardSpec, GrayImage, Intrinsics, Pose};
use nalgebra::Point2;

const WIDTH: usize = 640;
const HEIGHT: usize = 480;

fn camera() -> CameraModel {
    CameraModel::pinhole(Intrinsics::new(600.0, 600.0, 320.0, 240.0))
}

fn render(pattern: &CheckerboardSpec, pose: &Pose) -> GrayImage {
    render_checkerboard(&camera(), pose, pattern, WIDTH, HEIGHT, 3)
}

fn max_error(found: &[Point2<f64>], truth: &[Point2<f64>]) -> f64 {
    found
        .iter()
        .zip(truth)
        .map(|(a, b)| (a - b).norm())
        .fold(0.0, f64::max)
}

#[test]
fn finds_full_grid_in_row_major_order() {
    let pattern = CheckerboardSpec::new(6, 5).unwrap();
    let pose = board_facing_pose(&pattern, 0.2, -0.1, 0.05, 12.0);
    let img = render(&pattern, &pose);

    let detector = ChessboardDetector::new(pattern, ChessboardParams::default());
    let outcome = detector.detect(&img.view());
    let corners = outcome.corners().expect("board should be found");

    assert_eq!(corners.len(), 30);
    assert_eq!((corners.columns(), corners.rows()), (6, 5));

    let truth = project_pattern(&camera(), &pose, &pattern);
    let err = max_error(corners.points(), &truth);
    assert!(err < 1.0, "max corner error {err:.3} px");

    // Row-major: x grows along a row, y grows down the columns.
    let p = corners.points();
    assert!(p[1].x > p[0].x);
    assert!(p[6].y > p[0].y);
}

#[test]
fn upside_down_board_keeps_its_physical_corner_order() {
    let pattern = CheckerboardSpec::new(6, 5).unwrap();
    let pose = board_facing_pose(&pattern, 0.1, 0.1, std::f64::consts::PI, 12.0);
    let img = render(&pattern, &pose);

    let outcome = ChessboardDetector::new(pattern, ChessboardParams::default()).detect(&img.view());
    let corners = outcome.corners().expect("board should be found");

    let truth = project_pattern(&camera(), &pose, &pattern);
    let err = max_error(corners.points(), &truth);
    assert!(err < 1.0, "max corner error {err:.3} px");
}

#[test]
fn corner_order_follows_the_board_through_an_in_plane_turn() {
    let pattern = CheckerboardSpec::new(6, 5).unwrap();
    let detector = ChessboardDetector::new(pattern, ChessboardParams::default());
    for roll in [0.0, 0.6, 1.0, 1.4, 2.2] {
        let pose = board_facing_pose(&pattern, 0.1, -0.05, roll, 12.0);
        let img = render(&pattern, &pose);
        let outcome = detector.detect(&img.view());
        let corners = outcome.corners().expect("board should be found");

        let truth = project_pattern(&camera(), &pose, &pattern);
        let err = max_error(corners.points(), &truth);
        assert!(err < 1.0, "roll {roll}: max corner error {err:.3} px");
    }
}

#[test]
fn downscaled_detection_refines_at_full_resolution() {
    let pattern = CheckerboardSpec::new(6, 5).unwrap();
    let pose = board_facing_pose(&pattern, -0.15, 0.2, -0.1, 10.0);
    let img = render(&pattern, &pose);

    let params = ChessboardParams {
        detection_scale: Some(0.5),
        ..Default::default()
    };
    let outcome = ChessboardDetector::new(pattern, params).detect(&img.view());
    let corners = outcome.corners().expect("board should be found");

    let truth = project_pattern(&camera(), &pose, &pattern);
    let err = max_error(corners.points(), &truth);
    assert!(err < 1.0, "max corner error {err:.3} px");
}

#[test]
fn blank_frame_is_a_miss() {
    let mut img = GrayImage::new(WIDTH, HEIGHT);
    img.data.fill(200);
    let pattern = CheckerboardSpec::new(6, 5).unwrap();
    let outcome = ChessboardDetector::new(pattern, ChessboardParams::default()).detect(&img.view());
    assert!(matches!(outcome, DetectionOutcome::NotFound { .. }));
}

#[test]
fn wrong_grid_size_is_a_miss_with_candidates() {
    let board = CheckerboardSpec::new(6, 5).unwrap();
    let img = render(&board, &board_facing_pose(&board, 0.0, 0.0, 0.0, 12.0));

    let expected = CheckerboardSpec::new(7, 5).unwrap();
    let outcome = ChessboardDetector::new(expected, ChessboardParams::default()).detect(&img.view());
    match outcome {
        DetectionOutcome::NotFound { candidates } => assert!(candidates.len() >= 20),
        DetectionOutcome::Found(_) => panic!("a 6x5 board must not match a 7x5 pattern"),
    }
}
