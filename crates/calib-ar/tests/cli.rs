use assert_cmd::Command;
use predicates::prelude::*;

fn calib_ar() -> Command {
    Command::cargo_bin("calib-ar").unwrap()
}

#[test]
fn help_lists_the_flags() {
    calib_ar()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--grid-size"))
        .stdout(predicate::str::contains("--output"))
        .stdout(predicate::str::contains("--calibrate-after"));
}

#[test]
fn missing_input_fails() {
    calib_ar()
        .arg("/definitely/not/a/video/dir")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot open frame source"));
}

#[test]
fn invalid_grid_fails() {
    calib_ar()
        .args(["--grid-size", "1", "5", "--synthetic-frames", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid grid size"));
}

#[test]
fn invalid_log_level_fails() {
    calib_ar()
        .args(["--log", "LOUD", "--synthetic-frames", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value 'LOUD'"));
}

#[test]
fn synthetic_stream_runs_to_the_end() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("recording");
    calib_ar()
        .args(["--synthetic-frames", "2", "--log", "WARNING", "--output"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("frames: 2"));
    assert!(out.join("frame_000000.png").exists());
    assert!(out.join("frame_000001.png").exists());
}

#[test]
fn quit_after_stops_early() {
    calib_ar()
        .args(["--synthetic-frames", "50", "--quit-after", "2", "--log", "ERROR"])
        .assert()
        .success()
        .stdout(predicate::str::contains("frames: 2"));
}

#[test]
fn reads_a_still_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("still.png");
    image::RgbImage::from_pixel(64, 48, image::Rgb([90, 90, 90]))
        .save(&path)
        .unwrap();
    calib_ar()
        .arg(&path)
        .args(["--log", "DEBUG"])
        .assert()
        .success()
        .stdout(predicate::str::contains("frames: 1, detections: 0"));
}
