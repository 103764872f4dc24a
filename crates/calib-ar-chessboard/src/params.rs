use serde::{Deserialize, Serialize};

/// Settings forwarded to the `chess-corners` ChESS detector.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessCornerParams {
    /// Response threshold relative to the strongest response in the frame.
    pub threshold_rel: f32,
    /// Non-maximum suppression radius in pixels.
    pub nms_radius: u32,
}

impl Default for ChessCornerParams {
    fn default() -> Self {
        Self {
            threshold_rel: 0.2,
            nms_radius: 2,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LatticeParams {
    /// Minimal spacing between neighbouring corners (full-resolution pixels).
    pub min_spacing_pix: f64,
    /// Maximal spacing between neighbouring corners (full-resolution pixels).
    pub max_spacing_pix: f64,
    /// Neighbours inspected when looking for a seed cross.
    pub k_neighbors: usize,
    /// Tolerance for the seed cross: `|a + b|` relative to the mean arm length.
    pub opposite_tolerance: f64,
    /// Search radius around a predicted corner, relative to the local step.
    pub prediction_tolerance: f64,
    /// Number of seeds tried, strongest candidates first.
    pub max_seeds: usize,
}

impl Default for LatticeParams {
    fn default() -> Self {
        Self {
            min_spacing_pix: 5.0,
            max_spacing_pix: 250.0,
            k_neighbors: 9,
            opposite_tolerance: 0.25,
            prediction_tolerance: 0.35,
            max_seeds: 20,
        }
    }
}

/// Iterative gradient-orthogonality refinement (`cornerSubPix`).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SubPixParams {
    /// Half side of the search window; a value of 5 gives an 11x11 window.
    pub half_window: usize,
    /// Half side of the dead zone in the middle of the window, if any.
    pub zero_zone: Option<usize>,
    pub max_iters: usize,
    /// Stop once a corner moves less than this many pixels.
    pub epsilon: f64,
}

impl Default for SubPixParams {
    fn default() -> Self {
        Self {
            half_window: 5,
            zero_zone: None,
            max_iters: 30,
            epsilon: 1e-3,
        }
    }
}

/// Parameters of the full-grid checkerboard detector.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessboardParams {
    pub chess: ChessCornerParams,
    pub lattice: LatticeParams,
    pub subpix: SubPixParams,
    /// Downscale factor for candidate detection in `(0, 1]`; refinement
    /// always runs at full resolution.
    pub detection_scale: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let p: ChessboardParams =
            serde_json::from_str(r#"{ "subpix": { "half_window": 3 }, "detection_scale": 0.5 }"#)
                .unwrap();
        assert_eq!(p.subpix.half_window, 3);
        assert_eq!(p.subpix.max_iters, 30);
        assert_eq!(p.detection_scale, Some(0.5));
        assert_eq!(p.lattice.k_neighbors, 9);
    }
}
