//! Synthetic planar checkerboard scenes.
//!
//! Used by the synthetic frame source and by tests: boards are rendered by
//! casting a ray through every sub-pixel and intersecting it with the board
//! plane, so the exact corner projections are known.

use crate::{CameraModel, CheckerboardSpec, GrayImage, Pose};
use nalgebra::{Point2, Point3, Rotation3, Vector3};

/// Intensity of dark squares.
pub const DARK: u8 = 20;
/// Intensity of light squares and background.
pub const LIGHT: u8 = 235;

/// Pose that puts the board centre on the optical axis at `distance`,
/// rotated by `tilt_x`/`tilt_y` (out of plane) and `roll` (in plane), radians.
pub fn board_facing_pose(
    pattern: &CheckerboardSpec,
    tilt_x: f64,
    tilt_y: f64,
    roll: f64,
    distance: f64,
) -> Pose {
    let s = pattern.square_size();
    let centre = Vector3::new(
        (pattern.columns() - 1) as f64 * s * 0.5,
        (pattern.rows() - 1) as f64 * s * 0.5,
        0.0,
    );
    let rotation = Rotation3::from_euler_angles(tilt_x, tilt_y, roll);
    let translation = Vector3::new(0.0, 0.0, distance) - rotation * centre;
    Pose::new(rotation, translation)
}

/// A small spread of distinct, well-conditioned views for calibration.
pub fn calibration_poses(pattern: &CheckerboardSpec, distance: f64) -> Vec<Pose> {
    [
        (0.0, 0.0, 0.0),
        (0.35, 0.0, 0.05),
        (-0.3, 0.1, -0.1),
        (0.05, 0.4, 0.15),
        (0.1, -0.35, -0.05),
        (0.25, 0.25, 0.2),
        (-0.2, -0.25, 0.1),
    ]
    .iter()
    .map(|&(tx, ty, roll)| board_facing_pose(pattern, tx, ty, roll, distance))
    .collect()
}

/// Exact image positions of the pattern corners (row-major).
pub fn project_pattern(
    camera: &CameraModel,
    pose: &Pose,
    pattern: &CheckerboardSpec,
) -> Vec<Point2<f64>> {
    camera.project_points(pose, &pattern.object_points())
}

/// Board-plane coordinates (in squares) seen through pixel `(x, y)`.
fn board_point_at_pixel(
    camera: &CameraModel,
    pose: &Pose,
    inv_rotation: &Rotation3<f64>,
    x: f64,
    y: f64,
) -> Option<Point3<f64>> {
    let n = camera.normalize(&Point2::new(x, y));
    let ray = Vector3::new(n.x, n.y, 1.0);
    // Plane z_board = 0  <=>  r3 . (lambda * ray - t) = 0, r3 = third column of R.
    let r3 = pose.rotation.matrix().column(2).into_owned();
    let denom = r3.dot(&ray);
    if denom.abs() < 1e-12 {
        return None;
    }
    let lambda = r3.dot(&pose.translation) / denom;
    if lambda <= 0.0 {
        return None;
    }
    Some(Point3::from(inv_rotation * (ray * lambda - pose.translation)))
}

fn shade(pattern: &CheckerboardSpec, p: &Point3<f64>) -> f64 {
    let u = p.x / pattern.square_size();
    let v = p.y / pattern.square_size();
    let (cols, rows) = (pattern.columns() as f64, pattern.rows() as f64);
    if u < -1.0 || v < -1.0 || u >= cols || v >= rows {
        return LIGHT as f64;
    }
    let parity = (u.floor() as i64 + v.floor() as i64).rem_euclid(2);
    if parity == 0 {
        DARK as f64
    } else {
        LIGHT as f64
    }
}

/// Render the board seen by `camera` at `pose` into a `width x height` image.
///
/// Every pixel averages `supersample x supersample` rays, which gives
/// anti-aliased edges. The board has one square of margin around the inner
/// corners and sits on a light background.
pub fn render_checkerboard(
    camera: &CameraModel,
    pose: &Pose,
    pattern: &CheckerboardSpec,
    width: usize,
    height: usize,
    supersample: usize,
) -> GrayImage {
    let ss = supersample.max(1);
    let inv_rotation = pose.rotation.inverse();
    let mut out = GrayImage::new(width, height);
    let weight = 1.0 / (ss * ss) as f64;

    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for sy in 0..ss {
                for sx in 0..ss {
                    // Pixel centres sit at integer coordinates.
                    let px = x as f64 - 0.5 + (sx as f64 + 0.5) / ss as f64;
                    let py = y as f64 - 0.5 + (sy as f64 + 0.5) / ss as f64;
                    acc += match board_point_at_pixel(camera, pose, &inv_rotation, px, py) {
                        Some(p) => shade(pattern, &p),
                        None => LIGHT as f64,
                    };
                }
            }
            out.data[y * width + x] = (acc * weight).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
