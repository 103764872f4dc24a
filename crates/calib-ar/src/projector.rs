//! Virtual object placed on the board and its projection into the frame.

use calib_ar_core::{CameraModel, Pose};
use nalgebra::{Point2, Point3};

/// Board-frame vertices of the augmented object.
#[derive(Clone, Debug, PartialEq)]
pub struct ArObject {
    vertices: Vec<Point3<f64>>,
}

impl ArObject {
    /// Cube standing on the board at the first corner.
    ///
    /// Vertices 0..4 are the base on `z = 0`, 4..8 the top at `z = -side`
    /// (towards the camera), with vertex `i + 4` above vertex `i`.
    pub fn cube(side: f64) -> Self {
        let s = side;
        Self {
            vertices: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(0.0, s, 0.0),
                Point3::new(s, s, 0.0),
                Point3::new(s, 0.0, 0.0),
                Point3::new(0.0, 0.0, -s),
                Point3::new(0.0, s, -s),
                Point3::new(s, s, -s),
                Point3::new(s, 0.0, -s),
            ],
        }
    }

    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    /// Image positions of all vertices, in vertex order.
    pub fn project(&self, camera: &CameraModel, pose: &Pose) -> ProjectedVertices {
        ProjectedVertices {
            points: camera.project_points(pose, &self.vertices),
        }
    }
}

impl Default for ArObject {
    fn default() -> Self {
        Self::cube(3.0)
    }
}

/// One image point per object vertex, index-aligned with [`ArObject::vertices`].
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectedVertices {
    pub points: Vec<Point2<f64>>,
}

impl ProjectedVertices {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_finite(&self) -> bool {
        self.points.iter().all(|p| p.x.is_finite() && p.y.is_finite())
    }
}
