//! Sub-pixel corner refinement by gradient orthogonality.
//!
//! For a true saddle point `q`, every image gradient `g(p)` in its
//! neighbourhood is orthogonal to `p - q`. Solving the weighted normal
//! equations `sum(g g^T) q = sum(g g^T p)` and iterating converges to the
//! saddle within a fraction of a pixel.

use crate::params::SubPixParams;
use calib_ar_core::{sample_bilinear, GrayImageView};
use nalgebra::{Matrix2, Point2, Vector2};

/// Refine one corner estimate in place of `start`.
///
/// Falls back to `start` when the system is singular or the iterate leaves
/// the search window.
pub fn refine_corner(
    img: &GrayImageView<'_>,
    start: Point2<f64>,
    params: &SubPixParams,
) -> Point2<f64> {
    let hw = params.half_window.max(1) as i64;
    let zz = params.zero_zone.map(|z| z as i64);
    let eps2 = params.epsilon * params.epsilon;
    let scale = hw as f64;

    let mut q = start;
    for _ in 0..params.max_iters.max(1) {
        let mut g = Matrix2::<f64>::zeros();
        let mut rhs = Vector2::<f64>::zeros();

        for dy in -hw..=hw {
            for dx in -hw..=hw {
                if let Some(z) = zz {
                    if dx.abs() <= z && dy.abs() <= z {
                        continue;
                    }
                }
                let (fx, fy) = (dx as f64, dy as f64);
                let w = (-(fx * fx + fy * fy) / (scale * scale)).exp();
                let (x, y) = (q.x + fx, q.y + fy);
                let gx = 0.5 * (sample_bilinear(img, x + 1.0, y) - sample_bilinear(img, x - 1.0, y));
                let gy = 0.5 * (sample_bilinear(img, x, y + 1.0) - sample_bilinear(img, x, y - 1.0));

                let (gxx, gxy, gyy) = (w * gx * gx, w * gx * gy, w * gy * gy);
                g[(0, 0)] += gxx;
                g[(0, 1)] += gxy;
                g[(1, 1)] += gyy;
                rhs.x += gxx * fx + gxy * fy;
                rhs.y += gxy * fx + gyy * fy;
            }
        }
        g[(1, 0)] = g[(0, 1)];

        let Some(delta) = g.try_inverse().map(|inv| inv * rhs) else {
            return start;
        };
        q += delta;
        if delta.norm_squared() <= eps2 {
            break;
        }
    }

    let drift = q - start;
    if !q.x.is_finite() || !q.y.is_finite() || drift.x.abs() > scale || drift.y.abs() > scale {
        return start;
    }
    q
}

/// Refine every corner of a set; order is preserved.
pub fn refine_corners(
    img: &GrayImageView<'_>,
    corners: &[Point2<f64>],
    params: &SubPixParams,
) -> Vec<Point2<f64>> {
    corners
        .iter()
        .map(|&c| refine_corner(img, c, params))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use calib_ar_core::GrayImage;

    // Axis-aligned saddle at (cx, cy), rendered with 8x8 supersampling.
    fn saddle(width: usize, height: usize, cx: f64, cy: f64) -> GrayImage {
        let mut img = GrayImage::new(width, height);
        let ss = 8;
        for y in 0..height {
            for x in 0..width {
                let mut acc = 0.0;
                for sy in 0..ss {
                    for sx in 0..ss {
                        let px = x as f64 - 0.5 + (sx as f64 + 0.5) / ss as f64;
                        let py = y as f64 - 0.5 + (sy as f64 + 0.5) / ss as f64;
                        let dark = (px < cx) == (py < cy);
                        acc += if dark { 20.0 } else { 235.0 };
                    }
                }
                img.data[y * width + x] = (acc / (ss * ss) as f64).round() as u8;
            }
        }
        img
    }

    #[test]
    fn converges_to_saddle_point() {
        let img = saddle(40, 40, 20.3, 19.6);
        let refined = refine_corner(
            &img.view(),
            Point2::new(21.5, 18.5),
            &SubPixParams::default(),
        );
        assert!((refined.x - 20.3).abs() < 0.1, "x = {}", refined.x);
        assert!((refined.y - 19.6).abs() < 0.1, "y = {}", refined.y);
    }

    #[test]
    fn flat_patch_keeps_start() {
        let mut img = GrayImage::new(20, 20);
        img.data.fill(128);
        let start = Point2::new(10.0, 10.0);
        assert_eq!(
            refine_corner(&img.view(), start, &SubPixParams::default()),
            start
        );
    }
}
