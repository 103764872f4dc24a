//! Raster primitives on `image::RgbImage`.
//!
//! Everything clips to the frame: off-screen or non-finite geometry is
//! silently skipped, never an error.

use image::{Rgb, RgbImage};
use nalgebra::Point2;

#[inline]
fn set_pixel(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && x < img.width() as i64 && y < img.height() as i64 {
        img.put_pixel(x as u32, y as u32, color);
    }
}

// Liang-Barsky clip of the segment against `[lo, hi]` in both axes.
fn clip_segment(
    a: Point2<f64>,
    b: Point2<f64>,
    lo: f64,
    hi_x: f64,
    hi_y: f64,
) -> Option<(Point2<f64>, Point2<f64>)> {
    if !(a.x.is_finite() && a.y.is_finite() && b.x.is_finite() && b.y.is_finite()) {
        return None;
    }
    let d = b - a;
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for (p, q) in [
        (-d.x, a.x - lo),
        (d.x, hi_x - a.x),
        (-d.y, a.y - lo),
        (d.y, hi_y - a.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return None;
        }
    }
    Some((a + d * t0, a + d * t1))
}

/// Bresenham line; `thickness > 1` stamps a square brush at every step.
pub fn draw_line(
    img: &mut RgbImage,
    from: Point2<f64>,
    to: Point2<f64>,
    color: Rgb<u8>,
    thickness: u32,
) {
    let margin = thickness as f64;
    let Some((a, b)) = clip_segment(
        from,
        to,
        -margin,
        img.width() as f64 + margin,
        img.height() as f64 + margin,
    ) else {
        return;
    };

    let (mut x0, mut y0) = (a.x.round() as i64, a.y.round() as i64);
    let (x1, y1) = (b.x.round() as i64, b.y.round() as i64);
    let dx = (x1 - x0).abs();
    let dy = (y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx - dy;
    let half = thickness.max(1) as i64 / 2;

    loop {
        for oy in -half..=half {
            for ox in -half..=half {
                set_pixel(img, x0 + ox, y0 + oy, color);
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 > -dy {
            err -= dy;
            x0 += sx;
        }
        if e2 < dx {
            err += dx;
            y0 += sy;
        }
    }
}

/// Midpoint circle outline.
pub fn draw_circle(img: &mut RgbImage, center: Point2<f64>, radius: u32, color: Rgb<u8>) {
    if !(center.x.is_finite() && center.y.is_finite()) {
        return;
    }
    let r = radius as i64;
    let (cx, cy) = (center.x.round(), center.y.round());
    let (w, h) = (img.width() as f64, img.height() as f64);
    if cx + (r as f64) < 0.0 || cy + (r as f64) < 0.0 || cx - (r as f64) >= w || cy - (r as f64) >= h {
        return;
    }
    let (cx, cy) = (cx as i64, cy as i64);

    let (mut x, mut y) = (r, 0i64);
    let mut err = 1 - r;
    while x >= y {
        for (px, py) in [
            (x, y),
            (y, x),
            (-y, x),
            (-x, y),
            (-x, -y),
            (-y, -x),
            (y, -x),
            (x, -y),
        ] {
            set_pixel(img, cx + px, cy + py, color);
        }
        y += 1;
        if err < 0 {
            err += 2 * y + 1;
        } else {
            x -= 1;
            err += 2 * (y - x) + 1;
        }
    }
}

/// Bitwise NOT of every channel.
pub fn invert(img: &mut RgbImage) {
    for v in img.iter_mut() {
        *v = !*v;
    }
}
