//! Non-linear least squares on top of the `levenberg-marquardt` crate.
//!
//! Problems expose residuals and an analytic Jacobian through [`NllsProblem`];
//! [`minimize`] adapts them to the crate's MINPACK-style solver.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use log::trace;
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dense residual vector `r(x)` with its Jacobian `d r / d x`.
pub trait NllsProblem {
    fn num_params(&self) -> usize;
    fn num_residuals(&self) -> usize;
    fn residuals(&self, x: &DVector<f64>) -> DVector<f64>;
    /// `num_residuals x num_params`.
    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    /// Iteration cap; the solver allows `max_iters * (n + 1)` evaluations.
    pub max_iters: usize,
    /// Relative tolerance on the cost reduction.
    pub ftol: f64,
    /// Orthogonality tolerance between residuals and Jacobian columns.
    pub gtol: f64,
    /// Relative tolerance on parameter updates.
    pub xtol: f64,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 200,
            ftol: 1e-10,
            gtol: 1e-10,
            xtol: 1e-10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolveReport {
    /// Sum of squared residuals at the initial parameters.
    pub initial_cost: f64,
    /// Sum of squared residuals at the returned parameters.
    pub final_cost: f64,
    /// Residual evaluations spent by the solver.
    pub evaluations: usize,
    /// Whether the solver stopped on one of its tolerances.
    pub converged: bool,
    pub termination: String,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolveError {
    #[error("problem has no parameters or no residuals")]
    EmptyProblem,
    #[error("residual or Jacobian dimensions do not match the problem")]
    DimensionMismatch,
    #[error("initial residuals are not finite")]
    NonFinite,
    #[error("numerical failure in the solver: {0}")]
    Numerical(&'static str),
}

struct LmWrapper<'a, P: NllsProblem + ?Sized> {
    problem: &'a P,
    params: DVector<f64>,
}

impl<P: NllsProblem + ?Sized> LeastSquaresProblem<f64, Dyn, Dyn> for LmWrapper<'_, P> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.problem.residuals(&self.params))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        Some(self.problem.jacobian(&self.params))
    }
}

/// Minimise `|r(x)|^2` from `x0`.
pub fn minimize<P>(problem: &P, x0: DVector<f64>, opts: &SolveOptions) -> Result<(DVector<f64>, SolveReport), SolveError>
where
    P: NllsProblem + ?Sized,
{
    if problem.num_params() == 0 || problem.num_residuals() == 0 {
        return Err(SolveError::EmptyProblem);
    }
    if x0.len() != problem.num_params() {
        return Err(SolveError::DimensionMismatch);
    }
    let r0 = problem.residuals(&x0);
    if r0.len() != problem.num_residuals() {
        return Err(SolveError::DimensionMismatch);
    }
    if !r0.iter().all(|v| v.is_finite()) {
        return Err(SolveError::NonFinite);
    }
    let initial_cost = r0.norm_squared();

    let lm = LevenbergMarquardt::new()
        .with_ftol(opts.ftol)
        .with_xtol(opts.xtol)
        .with_gtol(opts.gtol)
        .with_patience(opts.max_iters.max(1));
    let (wrapper, report) = lm.minimize(LmWrapper { problem, params: x0 });

    match report.termination {
        TerminationReason::NoParameters | TerminationReason::NoResiduals => {
            return Err(SolveError::EmptyProblem)
        }
        TerminationReason::WrongDimensions(_) => return Err(SolveError::DimensionMismatch),
        TerminationReason::Numerical(what) => return Err(SolveError::Numerical(what)),
        _ => {}
    }

    let x = wrapper.params;
    let final_cost = problem.residuals(&x).norm_squared();
    trace!(
        "lm: cost {initial_cost:.3e} -> {final_cost:.3e} in {} evaluations ({:?})",
        report.number_of_evaluations,
        report.termination
    );
    Ok((
        x,
        SolveReport {
            initial_cost,
            final_cost,
            evaluations: report.number_of_evaluations,
            converged: report.termination.was_successful(),
            termination: format!("{:?}", report.termination),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rosenbrock;

    impl NllsProblem for Rosenbrock {
        fn num_params(&self) -> usize {
            2
        }
        fn num_residuals(&self) -> usize {
            2
        }
        fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
            DVector::from_vec(vec![10.0 * (x[1] - x[0] * x[0]), 1.0 - x[0]])
        }
        fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_row_slice(2, 2, &[-20.0 * x[0], 10.0, -1.0, 0.0])
        }
    }

    struct ExpFit {
        xs: Vec<f64>,
        ys: Vec<f64>,
    }

    impl NllsProblem for ExpFit {
        fn num_params(&self) -> usize {
            2
        }
        fn num_residuals(&self) -> usize {
            self.xs.len()
        }
        fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
            DVector::from_iterator(
                self.xs.len(),
                self.xs.iter().zip(&self.ys).map(|(x, y)| p[0] * (p[1] * x).exp() - y),
            )
        }
        fn jacobian(&self, p: &DVector<f64>) -> DMatrix<f64> {
            let mut j = DMatrix::zeros(self.xs.len(), 2);
            for (i, x) in self.xs.iter().enumerate() {
                let e = (p[1] * x).exp();
                j[(i, 0)] = e;
                j[(i, 1)] = p[0] * x * e;
            }
            j
        }
    }

    #[test]
    fn solves_rosenbrock() {
        let (x, report) =
            minimize(&Rosenbrock, DVector::from_vec(vec![-1.2, 1.0]), &SolveOptions::default()).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-6 && (x[1] - 1.0).abs() < 1e-6, "{x}");
        assert!(report.final_cost < 1e-12);
        assert!(report.final_cost <= report.initial_cost);
        assert!(report.converged, "{report:?}");
    }

    #[test]
    fn fits_exponential() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let ys = xs.iter().map(|x| 2.5 * (-1.3 * x).exp()).collect();
        let problem = ExpFit { xs, ys };
        let (p, _) = minimize(&problem, DVector::from_vec(vec![1.0, 0.0]), &SolveOptions::default()).unwrap();
        assert!((p[0] - 2.5).abs() < 1e-6);
        assert!((p[1] + 1.3).abs() < 1e-6);
    }

    #[test]
    fn rejects_wrong_dimension() {
        assert_eq!(
            minimize(&Rosenbrock, DVector::from_vec(vec![0.0]), &SolveOptions::default()).unwrap_err(),
            SolveError::DimensionMismatch
        );
    }

    #[test]
    fn rejects_non_finite_start() {
        let x0 = DVector::from_vec(vec![f64::NAN, 1.0]);
        assert_eq!(
            minimize(&Rosenbrock, x0, &SolveOptions::default()).unwrap_err(),
            SolveError::NonFinite
        );
    }
}
