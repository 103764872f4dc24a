//! Checkerboard pattern model and per-frame corner sets.
//!
//! Both the object points and the detected corners use the same **row-major**
//! ordering: point `k = j * columns + i` is the inner corner in column `i`
//! and row `j`, located at `(i, j, 0) * square_size` on the board plane.

use nalgebra::{Point2, Point3};

/// Pattern validation errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PatternError {
    #[error("grid must have at least 2x2 inner corners (got {columns}x{rows})")]
    InvalidSize { columns: u32, rows: u32 },
    #[error("square_size must be finite and > 0 (got {0})")]
    InvalidSquareSize(f64),
    #[error("corner set has {got} points, pattern needs {expected}")]
    CornerCountMismatch { expected: usize, got: usize },
}

/// Inner-corner grid of a planar checkerboard.
///
/// `columns`/`rows` count *inner corners*, not squares.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CheckerboardSpec {
    columns: u32,
    rows: u32,
    square_size: f64,
}

impl CheckerboardSpec {
    /// Validate and build a pattern with unit square size.
    pub fn new(columns: u32, rows: u32) -> Result<Self, PatternError> {
        if columns < 2 || rows < 2 {
            return Err(PatternError::InvalidSize { columns, rows });
        }
        Ok(Self {
            columns,
            rows,
            square_size: 1.0,
        })
    }

    /// Scale object points by the physical square size.
    pub fn with_square_size(mut self, square_size: f64) -> Result<Self, PatternError> {
        if !square_size.is_finite() || square_size <= 0.0 {
            return Err(PatternError::InvalidSquareSize(square_size));
        }
        self.square_size = square_size;
        Ok(self)
    }

    #[inline]
    pub fn columns(&self) -> u32 {
        self.columns
    }

    #[inline]
    pub fn rows(&self) -> u32 {
        self.rows
    }

    #[inline]
    pub fn square_size(&self) -> f64 {
        self.square_size
    }

    /// Number of inner corners, `columns * rows`.
    #[inline]
    pub fn point_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    /// Row-major index of the corner in column `i`, row `j`.
    #[inline]
    pub fn index(&self, i: u32, j: u32) -> usize {
        j as usize * self.columns as usize + i as usize
    }

    /// Inverse of [`CheckerboardSpec::index`].
    #[inline]
    pub fn grid_coords(&self, index: usize) -> (u32, u32) {
        let cols = self.columns as usize;
        ((index % cols) as u32, (index / cols) as u32)
    }

    /// Board-plane coordinates of every inner corner (row-major).
    pub fn plane_points(&self) -> Vec<Point2<f64>> {
        let s = self.square_size;
        (0..self.rows)
            .flat_map(|j| (0..self.columns).map(move |i| Point2::new(i as f64 * s, j as f64 * s)))
            .collect()
    }

    /// 3D object points `(i, j, 0)` (row-major).
    pub fn object_points(&self) -> Vec<Point3<f64>> {
        self.plane_points()
            .into_iter()
            .map(|p| Point3::new(p.x, p.y, 0.0))
            .collect()
    }
}

/// Sub-pixel corners of one detected board, index-aligned with
/// [`CheckerboardSpec::object_points`].
#[derive(Clone, Debug, PartialEq)]
pub struct CornerSet {
    columns: u32,
    rows: u32,
    points: Vec<Point2<f64>>,
}

impl CornerSet {
    /// Wrap row-major points; the count must match the pattern exactly.
    pub fn new(spec: &CheckerboardSpec, points: Vec<Point2<f64>>) -> Result<Self, PatternError> {
        if points.len() != spec.point_count() {
            return Err(PatternError::CornerCountMismatch {
                expected: spec.point_count(),
                got: points.len(),
            });
        }
        Ok(Self {
            columns: spec.columns(),
            rows: spec.rows(),
            points,
        })
    }

    #[inline]
    pub fn points(&self) -> &[Point2<f64>] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn columns(&self) -> u32 {
        self.columns
    }

    #[inline]
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Corner at column `i`, row `j`.
    pub fn get(&self, i: u32, j: u32) -> Option<Point2<f64>> {
        if i >= self.columns || j >= self.rows {
            return None;
        }
        self.points
            .get(j as usize * self.columns as usize + i as usize)
            .copied()
    }

    pub fn into_points(self) -> Vec<Point2<f64>> {
        self.points
    }
}
