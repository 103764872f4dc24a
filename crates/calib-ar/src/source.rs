//! Frame sources.
//!
//! Camera capture and video container decoding live outside this crate; a
//! source here is either a directory of still images (or a single image),
//! or a synthetic board animation that stands in for a live camera.

use calib_ar_core::synthetic::{calibration_poses, render_checkerboard};
use calib_ar_core::{BrownConrady, CameraModel, CheckerboardSpec, Intrinsics, Pose};
use image::{DynamicImage, RgbImage};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot open frame source {path}: {reason}")]
    Unavailable { path: PathBuf, reason: String },
    #[error("failed to read frame {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Blocking, pull-based frame producer.
pub trait FrameSource {
    /// Next frame, or `None` at the end of the stream.
    fn read_frame(&mut self) -> Result<Option<RgbImage>, SourceError>;

    /// Release the underlying resources. Idempotent.
    fn release(&mut self);
}

const IMAGE_EXTENSIONS: [&str; 9] = ["png", "jpg", "jpeg", "bmp", "pgm", "ppm", "pnm", "tif", "tiff"];

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Frames decoded from a sorted directory of images, or from one still image.
#[derive(Debug)]
pub struct ImageSequenceSource {
    frames: Vec<PathBuf>,
    next: usize,
}

impl ImageSequenceSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let unavailable = |reason: String| SourceError::Unavailable {
            path: path.to_path_buf(),
            reason,
        };

        let frames = if path.is_dir() {
            let entries = std::fs::read_dir(path).map_err(|e| unavailable(e.to_string()))?;
            let mut frames: Vec<PathBuf> = entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| is_image_file(p))
                .collect();
            frames.sort();
            frames
        } else if is_image_file(path) {
            vec![path.to_path_buf()]
        } else if path.exists() {
            return Err(unavailable(
                "not an image file or a directory of images".to_string(),
            ));
        } else {
            return Err(unavailable("no such file or directory".to_string()));
        };

        if frames.is_empty() {
            return Err(unavailable("directory holds no image frames".to_string()));
        }
        info!("reading {} frame(s) from {}", frames.len(), path.display());
        Ok(Self { frames, next: 0 })
    }

    /// Frames not yet read.
    pub fn remaining(&self) -> usize {
        self.frames.len() - self.next
    }
}

impl FrameSource for ImageSequenceSource {
    fn read_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        let Some(path) = self.frames.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let img = image::open(path).map_err(|source| SourceError::Read {
            path: path.clone(),
            source,
        })?;
        Ok(Some(img.into_rgb8()))
    }

    fn release(&mut self) {
        self.next = self.frames.len();
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticSourceParams {
    /// Frames produced before the end of the stream.
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub focal: f64,
    /// Brown–Conrady coefficients `[k1, k2, p1, p2, k3]` of the simulated lens.
    pub distortion: [f64; 5],
    /// Board distance from the camera, in squares.
    pub distance: f64,
    /// Consecutive frames showing the same view.
    pub hold_frames: u64,
    /// Rays per pixel side when rendering.
    pub supersample: usize,
}

impl Default for SyntheticSourceParams {
    fn default() -> Self {
        Self {
            frames: 300,
            width: 640,
            height: 480,
            focal: 600.0,
            distortion: [0.0; 5],
            distance: 12.0,
            hold_frames: 30,
            supersample: 2,
        }
    }
}

/// Rendered board animation: cycles through a fixed spread of views.
///
/// Each distinct view is rendered once and cached.
pub struct SyntheticSource {
    params: SyntheticSourceParams,
    pattern: CheckerboardSpec,
    camera: CameraModel,
    poses: Vec<Pose>,
    cache: HashMap<usize, RgbImage>,
    produced: u64,
}

impl SyntheticSource {
    pub fn new(pattern: CheckerboardSpec, params: SyntheticSourceParams) -> Self {
        let w = params.width as f64;
        let h = params.height as f64;
        let camera = CameraModel::new(
            Intrinsics::new(params.focal, params.focal, (w - 1.0) * 0.5, (h - 1.0) * 0.5),
            BrownConrady::from_coeffs(params.distortion),
        );
        let poses = calibration_poses(&pattern, params.distance);
        debug!(
            "synthetic source: {} frames of {}x{}, {} views",
            params.frames,
            params.width,
            params.height,
            poses.len()
        );
        Self {
            params,
            pattern,
            camera,
            poses,
            cache: HashMap::new(),
            produced: 0,
        }
    }

    /// Ground-truth camera of the simulated stream.
    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    /// View index shown in frame `frame` (0-based).
    pub fn view_index(&self, frame: u64) -> usize {
        ((frame / self.params.hold_frames.max(1)) % self.poses.len() as u64) as usize
    }

    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    fn render(&self, view: usize) -> RgbImage {
        let gray = render_checkerboard(
            &self.camera,
            &self.poses[view],
            &self.pattern,
            self.params.width as usize,
            self.params.height as usize,
            self.params.supersample,
        );
        let buffer = image::GrayImage::from_raw(self.params.width, self.params.height, gray.data)
            .unwrap_or_else(|| image::GrayImage::new(self.params.width, self.params.height));
        DynamicImage::ImageLuma8(buffer).into_rgb8()
    }
}

impl FrameSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        if self.produced >= self.params.frames {
            return Ok(None);
        }
        let view = self.view_index(self.produced);
        self.produced += 1;
        if !self.cache.contains_key(&view) {
            let frame = self.render(view);
            self.cache.insert(view, frame);
        }
        Ok(self.cache.get(&view).cloned())
    }

    fn release(&mut self) {
        self.cache.clear();
        self.produced = self.params.frames;
    }
}
