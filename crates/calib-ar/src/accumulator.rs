//! Calibration sample accumulation while the camera is still uncalibrated.

use calib_ar_core::{CheckerboardSpec, CornerSet};
use calib_ar_solver::CalibrationSample;
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorParams {
    /// Keep one detection out of every `sampling_period`.
    pub sampling_period: u64,
}

impl Default for AccumulatorParams {
    fn default() -> Self {
        Self { sampling_period: 30 }
    }
}

/// Append-only store of retained board views.
///
/// Every successful detection bumps a counter; the view is kept when the
/// counter is a multiple of the sampling period, so consecutive near-identical
/// frames do not flood the solver.
#[derive(Clone, Debug)]
pub struct SampleAccumulator {
    pattern: CheckerboardSpec,
    params: AccumulatorParams,
    samples: Vec<CalibrationSample>,
    detections: u64,
}

impl SampleAccumulator {
    pub fn new(pattern: CheckerboardSpec, params: AccumulatorParams) -> Self {
        Self {
            pattern,
            params,
            samples: Vec::new(),
            detections: 0,
        }
    }

    fn period(&self) -> u64 {
        self.params.sampling_period.max(1)
    }

    /// Count one detection and retain it if it falls on the sampling period.
    ///
    /// Returns whether the view was retained.
    pub fn consider_frame(&mut self, corners: &CornerSet, resolution: (u32, u32)) -> bool {
        self.detections += 1;
        if self.detections % self.period() != 0 {
            return false;
        }
        self.samples
            .push(CalibrationSample::from_corners(&self.pattern, corners, resolution));
        debug!(
            "retained calibration sample #{} at detection {}",
            self.samples.len(),
            self.detections
        );
        true
    }

    pub fn samples(&self) -> &[CalibrationSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Successful detections seen so far.
    pub fn detections(&self) -> u64 {
        self.detections
    }

    pub fn params(&self) -> &AccumulatorParams {
        &self.params
    }
}
