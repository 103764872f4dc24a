//! Generic, model-agnostic RANSAC.
//!
//! Implement [`Estimator`] for a model and call [`ransac`]. Failure to reach
//! consensus is reported through [`RansacResult::success`], never by panicking.

use rand::prelude::IndexedRandom;
use rand::{rngs::StdRng, SeedableRng};

#[derive(Debug, Clone)]
pub struct RansacOptions {
    pub max_iters: usize,
    /// Inlier residual threshold, in the units of [`Estimator::residual`].
    pub thresh: f64,
    /// Minimum number of inliers required to accept a model.
    pub min_inliers: usize,
    /// Desired probability in `[0, 1]` of drawing one all-inlier sample.
    pub confidence: f64,
    pub seed: u64,
    /// Refit on the inliers of each accepted hypothesis before scoring.
    pub refit_on_inliers: bool,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 1000,
            thresh: 2.0,
            min_inliers: 4,
            confidence: 0.99,
            seed: 1_234_567,
            refit_on_inliers: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    pub success: bool,
    pub model: Option<M>,
    pub inliers: Vec<usize>,
    /// Root-mean-square residual over the inliers.
    pub inlier_rms: f64,
    pub iters: usize,
}

impl<M> Default for RansacResult<M> {
    fn default() -> Self {
        Self {
            success: false,
            model: None,
            inliers: Vec::new(),
            inlier_rms: f64::INFINITY,
            iters: 0,
        }
    }
}

/// A model family that RANSAC can hypothesise and score.
///
/// Estimators carry their own context (e.g. a camera model), hence `&self`.
pub trait Estimator {
    type Datum;
    type Model;

    /// Size of a minimal sample.
    const MIN_SAMPLES: usize;

    /// Fit a model from a minimal subset; `None` if fitting fails.
    fn fit(&self, data: &[Self::Datum], sample: &[usize]) -> Option<Self::Model>;

    /// Non-negative residual in the same units as [`RansacOptions::thresh`].
    fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> f64;

    fn is_degenerate(&self, _data: &[Self::Datum], _sample: &[usize]) -> bool {
        false
    }

    fn refit(&self, _data: &[Self::Datum], _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

fn rms(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::INFINITY;
    }
    let ss: f64 = vals.iter().map(|&v| v * v).sum();
    (ss / vals.len() as f64).sqrt()
}

/// Iterations needed to draw one all-inlier sample with probability `confidence`.
fn calculate_iterations(
    confidence: f64,
    inlier_ratio: f64,
    min_samples: usize,
    iters_so_far: usize,
    max_iters: usize,
) -> usize {
    if confidence <= 0.0 || inlier_ratio <= 0.0 {
        return max_iters;
    }
    if inlier_ratio >= 1.0 {
        return iters_so_far.min(max_iters);
    }

    let denom = (1.0 - inlier_ratio.powi(min_samples as i32)).max(1e-12).ln();
    if denom >= 0.0 {
        return max_iters;
    }
    let n_iter = ((1.0 - confidence).max(1e-12).ln() / denom).ceil() as usize;
    n_iter.clamp(iters_so_far, max_iters)
}

// More inliers wins; equal counts are decided by the lower inlier RMS.
fn is_better(best: &RansacResult<impl Sized>, count: usize, rms: f64) -> bool {
    !best.success || count > best.inliers.len() || (count == best.inliers.len() && rms < best.inlier_rms)
}

fn score<E: Estimator>(
    est: &E,
    model: &E::Model,
    data: &[E::Datum],
    thresh: f64,
    inliers: &mut Vec<usize>,
    residuals: &mut Vec<f64>,
) {
    inliers.clear();
    residuals.clear();
    for (i, datum) in data.iter().enumerate() {
        let r = est.residual(model, datum);
        if r <= thresh {
            inliers.push(i);
            residuals.push(r);
        }
    }
}

/// Run RANSAC with an adaptive iteration bound.
pub fn ransac<E: Estimator>(
    est: &E,
    data: &[E::Datum],
    opts: &RansacOptions,
) -> RansacResult<E::Model> {
    let mut best: RansacResult<E::Model> = RansacResult::default();
    if data.len() < E::MIN_SAMPLES {
        return best;
    }

    let all_indices: Vec<usize> = (0..data.len()).collect();
    let mut sample = vec![0usize; E::MIN_SAMPLES];
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut dynamic_max_iters = opts.max_iters;

    let mut inliers = Vec::with_capacity(data.len());
    let mut residuals = Vec::with_capacity(data.len());
    let mut refit_inliers = Vec::with_capacity(data.len());
    let mut refit_residuals = Vec::with_capacity(data.len());

    let mut iters = 0;
    while iters < dynamic_max_iters {
        iters += 1;
        all_indices
            .choose_multiple(&mut rng, E::MIN_SAMPLES)
            .enumerate()
            .for_each(|(k, &idx)| sample[k] = idx);

        if est.is_degenerate(data, &sample) {
            continue;
        }
        let Some(model) = est.fit(data, &sample) else {
            continue;
        };

        score(est, &model, data, opts.thresh, &mut inliers, &mut residuals);
        if inliers.len() < opts.min_inliers {
            continue;
        }

        let mut model = model;
        let (final_inliers, final_residuals) = if opts.refit_on_inliers {
            match est.refit(data, &inliers) {
                Some(m2) => {
                    score(est, &m2, data, opts.thresh, &mut refit_inliers, &mut refit_residuals);
                    if refit_inliers.len() >= inliers.len() {
                        model = m2;
                        (&refit_inliers, &refit_residuals)
                    } else {
                        (&inliers, &residuals)
                    }
                }
                None => (&inliers, &residuals),
            }
        } else {
            (&inliers, &residuals)
        };

        let final_rms = rms(final_residuals);
        if is_better(&best, final_inliers.len(), final_rms) {
            best.success = true;
            best.inliers = final_inliers.clone();
            best.inlier_rms = final_rms;
            best.model = Some(model);

            let ratio = best.inliers.len() as f64 / data.len() as f64;
            dynamic_max_iters =
                calculate_iterations(opts.confidence, ratio, E::MIN_SAMPLES, iters, opts.max_iters);
        }
    }

    best.iters = iters;
    best
}
