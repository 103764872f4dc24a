//! Overlays drawn onto the output frame.
//!
//! Every overlay implements [`Draw`]; the frame loop stacks them in the order
//! they should appear and [`compose`] renders them onto a copy of the frame.

use crate::draw::{draw_circle, draw_line, invert};
use crate::projector::ProjectedVertices;
use calib_ar_core::CornerSet;
use image::{Rgb, RgbImage};
use nalgebra::Point2;

/// Something that paints itself onto a frame.
pub trait Draw {
    fn draw(&self, frame: &mut RgbImage);
}

/// Render `layers` in order onto a copy of `frame`.
pub fn compose(frame: &RgbImage, layers: &[&dyn Draw]) -> RgbImage {
    let mut out = frame.clone();
    for layer in layers {
        layer.draw(&mut out);
    }
    out
}

const RED: Rgb<u8> = Rgb([255, 0, 0]);

// Cycled per board row.
const ROW_COLORS: [Rgb<u8>; 7] = [
    Rgb([255, 0, 0]),
    Rgb([255, 128, 0]),
    Rgb([200, 200, 0]),
    Rgb([0, 255, 0]),
    Rgb([0, 200, 200]),
    Rgb([0, 0, 255]),
    Rgb([255, 0, 255]),
];

const CORNER_RADIUS: u32 = 4;

/// Found board: a circle per corner coloured by row, joined in corner order.
pub struct CornerGrid<'a> {
    pub corners: &'a CornerSet,
}

impl Draw for CornerGrid<'_> {
    fn draw(&self, frame: &mut RgbImage) {
        let columns = self.corners.columns().max(1) as usize;
        let points = self.corners.points();
        for (k, p) in points.iter().enumerate() {
            let color = ROW_COLORS[(k / columns) % ROW_COLORS.len()];
            draw_circle(frame, *p, CORNER_RADIUS, color);
            if let Some(next) = points.get(k + 1) {
                draw_line(frame, *p, *next, color, 1);
            }
        }
    }
}

/// Board not found: raw candidates marked in red.
pub struct CandidateMarkers<'a> {
    pub points: &'a [Point2<f64>],
}

impl Draw for CandidateMarkers<'_> {
    fn draw(&self, frame: &mut RgbImage) {
        for p in self.points {
            draw_circle(frame, *p, CORNER_RADIUS, RED);
        }
    }
}

/// Flags a frame whose detection was retained for calibration.
pub struct InvertColors;

impl Draw for InvertColors {
    fn draw(&self, frame: &mut RgbImage) {
        invert(frame);
    }
}

/// Edge list of the cube: base, verticals, top.
pub const CUBE_EDGES: [(usize, usize); 12] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 0),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
    (4, 5),
    (5, 6),
    (6, 7),
    (7, 4),
];

/// Cube wireframe over projected vertices.
pub struct Wireframe<'a> {
    pub vertices: &'a ProjectedVertices,
    pub base_color: Rgb<u8>,
    pub pillar_color: Rgb<u8>,
    pub top_color: Rgb<u8>,
    pub thickness: u32,
}

impl<'a> Wireframe<'a> {
    pub fn new(vertices: &'a ProjectedVertices) -> Self {
        Self {
            vertices,
            base_color: Rgb([0, 255, 0]),
            pillar_color: Rgb([0, 0, 255]),
            top_color: Rgb([255, 0, 0]),
            thickness: 3,
        }
    }
}

impl Draw for Wireframe<'_> {
    fn draw(&self, frame: &mut RgbImage) {
        let p = &self.vertices.points;
        if p.len() < 8 {
            return;
        }
        for (k, &(a, b)) in CUBE_EDGES.iter().enumerate() {
            let color = match k {
                0..=3 => self.base_color,
                4..=7 => self.pillar_color,
                _ => self.top_color,
            };
            draw_line(frame, p[a], p[b], color, self.thickness);
        }
    }
}
