use calib_ar_core::synthetic::{calibration_poses, project_pattern};
use calib_ar_core::{BrownConrady, CameraModel, CheckerboardSpec, Intrinsics, Pose};
use calib_ar_solver::{
    calibrate, reprojection_errors, CalibrationError, CalibrationOptions, CalibrationSample,
};
use nalgebra::{Point2, Rotation3, Vector3};
use rand::{rngs::StdRng, Rng, SeedableRng};

const RESOLUTION: (u32, u32) = (640, 480);

fn samples(camera: &CameraModel, poses: &[Pose], noise: f64) -> Vec<CalibrationSample> {
    let pattern = CheckerboardSpec::new(6, 5).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    poses
        .iter()
        .map(|pose| {
            let image = project_pattern(camera, pose, &pattern)
                .into_iter()
                .map(|p| {
                    if noise > 0.0 {
                        Point2::new(
                            p.x + rng.random_range(-noise..noise),
                            p.y + rng.random_range(-noise..noise),
                        )
                    } else {
                        p
                    }
                })
                .collect();
            CalibrationSample::new(pattern.object_points(), image, RESOLUTION)
        })
        .collect()
}

fn relative_error(a: f64, b: f64) -> f64 {
    (a - b).abs() / b.abs()
}

#[test]
fn recovers_pinhole_intrinsics() {
    let pattern = CheckerboardSpec::new(6, 5).unwrap();
    let truth = CameraModel::pinhole(Intrinsics::new(800.0, 790.0, 325.0, 238.0));
    let data = samples(&truth, &calibration_poses(&pattern, 12.0), 0.15);

    let result = calibrate(&data, RESOLUTION, &CalibrationOptions::default()).expect("calibration");
    let k = result.camera.intrinsics;

    assert!(relative_error(k.fx, 800.0) < 0.01, "fx = {}", k.fx);
    assert!(relative_error(k.fy, 790.0) < 0.01, "fy = {}", k.fy);
    assert!(result.mean_error < 0.5, "mean error {}", result.mean_error);
    assert!(result.rms_error >= result.mean_error);
    assert_eq!(result.poses.len(), data.len());
    assert_eq!(result.per_view_rms.len(), data.len());
}

#[test]
fn recovers_radial_distortion() {
    let pattern = CheckerboardSpec::new(6, 5).unwrap();
    let truth = CameraModel::new(
        Intrinsics::new(760.0, 765.0, 318.0, 242.0),
        BrownConrady::from_coeffs([-0.12, 0.05, 0.0, 0.0, 0.0]),
    );
    let data = samples(&truth, &calibration_poses(&pattern, 11.0), 0.05);

    let result = calibrate(&data, RESOLUTION, &CalibrationOptions::default()).expect("calibration");
    let k = result.camera.intrinsics;

    assert!(relative_error(k.fx, 760.0) < 0.01, "fx = {}", k.fx);
    assert!(relative_error(k.fy, 765.0) < 0.01, "fy = {}", k.fy);
    assert!(result.rms_error < 0.5, "rms {}", result.rms_error);
}

#[test]
fn recovered_model_reproduces_sample_corners() {
    let pattern = CheckerboardSpec::new(6, 5).unwrap();
    let truth = CameraModel::pinhole(Intrinsics::new(700.0, 700.0, 320.0, 240.0));
    let data = samples(&truth, &calibration_poses(&pattern, 10.0), 0.1);

    let result = calibrate(&data, RESOLUTION, &CalibrationOptions::default()).expect("calibration");
    for (sample, pose) in data.iter().zip(&result.poses) {
        let worst = reprojection_errors(&result.camera, pose, sample)
            .into_iter()
            .fold(0.0, f64::max);
        assert!(worst < 0.5, "worst corner error {worst}");
    }
}

#[test]
fn single_view_keeps_principal_point_at_centre() {
    let pattern = CheckerboardSpec::new(6, 5).unwrap();
    let truth = CameraModel::pinhole(Intrinsics::new(650.0, 650.0, 319.5, 239.5));
    let pose = Pose::new(
        Rotation3::from_euler_angles(0.35, -0.3, 0.1),
        Vector3::new(-2.5, -2.0, 10.0),
    );
    let data = samples(&truth, &[pose], 0.0);

    let result = calibrate(&data, RESOLUTION, &CalibrationOptions::default()).expect("calibration");
    let k = result.camera.intrinsics;
    assert_eq!((k.cx, k.cy), (319.5, 239.5));
    assert!(result.rms_error < 0.5, "rms {}", result.rms_error);
}

#[test]
fn single_square_on_view_still_calibrates() {
    let pattern = CheckerboardSpec::new(6, 5).unwrap();
    let truth = CameraModel::pinhole(Intrinsics::new(600.0, 600.0, 319.5, 239.5));
    let first = calibration_poses(&pattern, 12.0)[0];
    for noise in [0.0, 0.1] {
        let data = samples(&truth, &[first], noise);
        let result = calibrate(&data, RESOLUTION, &CalibrationOptions::default()).expect("calibration");
        let k = result.camera.intrinsics;
        assert!(k.is_finite() && k.fx > 0.0 && k.fy > 0.0, "{k:?}");
        assert_eq!((k.cx, k.cy), (319.5, 239.5));
        assert!(result.rms_error < 0.5, "noise {noise}: rms {}", result.rms_error);
    }
}

#[test]
fn no_samples_is_insufficient() {
    assert_eq!(
        calibrate(&[], RESOLUTION, &CalibrationOptions::default()).unwrap_err(),
        CalibrationError::InsufficientSamples
    );
}
