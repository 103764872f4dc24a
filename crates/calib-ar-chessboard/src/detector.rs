use crate::lattice::{order_row_major, LatticeBuilder};
use crate::params::{ChessCornerParams, ChessboardParams};
use crate::subpix::refine_corners;
use calib_ar_core::{CheckerboardSpec, CornerSet, GrayImageView};
use chess_corners::{find_chess_corners_image, ChessConfig, CornerDescriptor, ThresholdMode};
use image::imageops::FilterType;
use log::{debug, trace, warn};
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Raw X-junction candidate in full-resolution pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub position: Point2<f64>,
    pub response: f64,
}

/// Result of one detection attempt. A miss is an expected outcome, not an error.
#[derive(Clone, Debug, PartialEq)]
pub enum DetectionOutcome {
    /// The full grid, row-major and refined to sub-pixel accuracy.
    Found(CornerSet),
    /// No complete grid; the raw candidates are kept for diagnostics overlays.
    NotFound { candidates: Vec<Point2<f64>> },
}

impl DetectionOutcome {
    pub fn corners(&self) -> Option<&CornerSet> {
        match self {
            Self::Found(c) => Some(c),
            Self::NotFound { .. } => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

fn chess_config(params: &ChessCornerParams) -> ChessConfig {
    let mut cfg = ChessConfig::single_scale();
    cfg.threshold_mode = ThresholdMode::Relative;
    cfg.threshold_value = params.threshold_rel as _;
    cfg.nms_radius = params.nms_radius as _;
    cfg
}

fn adapt_chess_corner(c: &CornerDescriptor, inv_scale: f64) -> Candidate {
    Candidate {
        position: Point2::new(c.x as f64 * inv_scale, c.y as f64 * inv_scale),
        response: c.response as f64,
    }
}

/// Full-grid checkerboard detector: ChESS candidates, lattice growth,
/// canonical ordering and `cornerSubPix`-style refinement.
pub struct ChessboardDetector {
    pattern: CheckerboardSpec,
    params: ChessboardParams,
    chess_cfg: ChessConfig,
}

impl ChessboardDetector {
    pub fn new(pattern: CheckerboardSpec, params: ChessboardParams) -> Self {
        let chess_cfg = chess_config(&params.chess);
        Self {
            pattern,
            params,
            chess_cfg,
        }
    }

    pub fn pattern(&self) -> &CheckerboardSpec {
        &self.pattern
    }

    pub fn params(&self) -> &ChessboardParams {
        &self.params
    }

    fn detection_scale(&self) -> f64 {
        match self.params.detection_scale {
            Some(s) if s > 0.0 && s < 1.0 => s,
            _ => 1.0,
        }
    }

    /// ChESS candidates of the frame, optionally found on a downscaled copy.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(width = img.width, height = img.height))
    )]
    pub fn find_candidates(&self, img: &GrayImageView<'_>) -> Vec<Candidate> {
        let Some(full) =
            image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data.to_vec())
        else {
            warn!(
                "grayscale buffer of {} bytes does not match {}x{}",
                img.data.len(),
                img.width,
                img.height
            );
            return Vec::new();
        };

        let scale = self.detection_scale();
        let corners = if scale < 1.0 {
            let w = ((img.width as f64 * scale).round() as u32).max(1);
            let h = ((img.height as f64 * scale).round() as u32).max(1);
            let small = image::imageops::resize(&full, w, h, FilterType::Triangle);
            find_chess_corners_image(&small, &self.chess_cfg)
        } else {
            find_chess_corners_image(&full, &self.chess_cfg)
        };
        let corners = match corners {
            Ok(corners) => corners,
            Err(e) => {
                warn!("ChESS corner detection failed: {e}");
                return Vec::new();
            }
        };

        let inv_scale = img.width as f64 / ((img.width as f64 * scale).round().max(1.0));
        corners
            .iter()
            .map(|c| adapt_chess_corner(c, inv_scale))
            .collect()
    }

    /// Assemble a full `columns x rows` lattice from candidates, row-major.
    ///
    /// `img` is the full-resolution frame the candidates live in; it anchors
    /// corner 0 by square colour.
    pub fn assemble(&self, img: &GrayImageView<'_>, candidates: &[Candidate]) -> Option<Vec<Point2<f64>>> {
        let need = self.pattern.point_count();
        if candidates.len() < need {
            debug!(
                "only {} ChESS candidates, a {}x{} board needs {}",
                candidates.len(),
                self.pattern.columns(),
                self.pattern.rows(),
                need
            );
            return None;
        }

        let points: Vec<Point2<f64>> = candidates.iter().map(|c| c.position).collect();
        let builder = LatticeBuilder::new(&points, &self.params.lattice);

        let mut seeds: Vec<usize> = (0..candidates.len()).collect();
        seeds.sort_by(|&a, &b| candidates[b].response.total_cmp(&candidates[a].response));

        for &seed in seeds.iter().take(self.params.lattice.max_seeds) {
            let Some(cross) = builder.seed_cross(seed) else {
                continue;
            };
            let lattice = builder.grow(&cross);
            if lattice.len() != need {
                trace!("seed {seed}: lattice of {} corners, need {need}", lattice.len());
                continue;
            }
            let (cols, rows) = (self.pattern.columns() as usize, self.pattern.rows() as usize);
            if let Some(ordered) = order_row_major(&lattice, &points, cols, rows, Some(img)) {
                return Some(ordered);
            }
            trace!("seed {seed}: lattice does not match the board layout");
        }
        None
    }

    /// Locate and refine the full inner-corner grid of the board.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(width = img.width, height = img.height))
    )]
    pub fn detect(&self, img: &GrayImageView<'_>) -> DetectionOutcome {
        let candidates = self.find_candidates(img);
        let Some(ordered) = self.assemble(img, &candidates) else {
            debug!("no full board among {} candidates", candidates.len());
            return DetectionOutcome::NotFound {
                candidates: candidates.into_iter().map(|c| c.position).collect(),
            };
        };

        let refined = refine_corners(img, &ordered, &self.params.subpix);
        match CornerSet::new(&self.pattern, refined) {
            Ok(set) => DetectionOutcome::Found(set),
            Err(e) => {
                warn!("assembled lattice rejected: {e}");
                DetectionOutcome::NotFound {
                    candidates: candidates.into_iter().map(|c| c.position).collect(),
                }
            }
        }
    }
}

/// One-shot helper: build a detector and run it on a single frame.
pub fn detect_chessboard(
    img: &GrayImageView<'_>,
    pattern: CheckerboardSpec,
    params: ChessboardParams,
) -> DetectionOutcome {
    ChessboardDetector::new(pattern, params).detect(img)
}
