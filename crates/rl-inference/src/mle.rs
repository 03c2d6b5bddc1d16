//! Maximum Likelihood Estimation

use crate::minimizer;
use crate::optimizer::{
    Minimizer, MinimizerKind, ObjectiveFunction, OptimizationResult, OptimizerConfig,
    project_gradient,
};
use nalgebra::{DMatrix, DVector};
use rl_core::traits::LogDensityModel;
use rl_core::{FitSummary, Result};

/// NLL of a model against a fixed dataset, as an optimizer objective.
struct NllObjective<'a, M: LogDensityModel + ?Sized> {
    model: &'a M,
    data: &'a M::Data,
}

impl<M: LogDensityModel + ?Sized> ObjectiveFunction for NllObjective<'_, M> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        self.model.nll(self.data, params)
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.model.grad_nll(self.data, params)
    }
}

/// Maximum Likelihood Estimator
///
/// Fits models by minimizing the negative log-likelihood. The solver family
/// and tolerance come from the process-wide [`minimizer`] defaults at call
/// time, so a [`crate::MinimizerScope`] changes every fit made inside it.
#[derive(Debug, Clone)]
pub struct MaximumLikelihoodEstimator {
    config: OptimizerConfig,
}

impl MaximumLikelihoodEstimator {
    /// Create a new MLE with default configuration
    pub fn new() -> Self {
        Self { config: OptimizerConfig::default() }
    }

    fn minimizer(&self) -> Result<Minimizer> {
        let defaults = minimizer::defaults();
        let kind = MinimizerKind::from_defaults(&defaults)?;
        let config = OptimizerConfig { tol: defaults.tolerance, ..self.config.clone() };
        Ok(Minimizer::new(kind, config))
    }

    /// Minimize NLL from the model's current values within its bounds.
    pub fn fit_minimum<M: LogDensityModel + ?Sized>(
        &self,
        model: &M,
        data: &M::Data,
    ) -> Result<OptimizationResult> {
        let init = model.parameter_init();
        let bounds = model.parameter_bounds();
        self.fit_minimum_from_with_bounds(model, data, &init, &bounds)
    }

    /// Minimize NLL from an explicit start point with explicit bounds.
    ///
    /// Setting `bounds[i] = (v, v)` fixes parameter `i` at `v` without
    /// touching the model.
    pub fn fit_minimum_from_with_bounds<M: LogDensityModel + ?Sized>(
        &self,
        model: &M,
        data: &M::Data,
        init: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        let objective = NllObjective { model, data };
        let result = self.minimizer()?.minimize(&objective, init, bounds)?;
        if !result.converged {
            log::debug!("fit did not converge: {} ({})", result.message, result);
        }
        Ok(result)
    }

    /// Free fit with covariance quality and EDM.
    ///
    /// Leaves the model at the best-fit point.
    pub fn fit<M: LogDensityModel + ?Sized>(&self, model: &mut M, data: &M::Data) -> Result<FitSummary> {
        let result = self.fit_minimum(&*model, data)?;
        let bounds = model.parameter_bounds();

        let hessian = self.compute_hessian(&*model, data, &result.parameters)?;
        let mut grad = model.grad_nll(data, &result.parameters)?;
        project_gradient(&result.parameters, &mut grad, &bounds);
        let (cov_qual, edm) = covariance_quality(&hessian, &grad);

        model.set_parameters(&result.parameters)?;

        Ok(FitSummary {
            parameters: result.parameters,
            nll: result.fval,
            cov_qual,
            edm,
            converged: result.converged,
        })
    }

    /// Numerical Hessian (central differences of the gradient), symmetrized.
    pub fn compute_hessian<M: LogDensityModel + ?Sized>(
        &self,
        model: &M,
        data: &M::Data,
        params: &[f64],
    ) -> Result<DMatrix<f64>> {
        let n = params.len();
        let mut hessian = DMatrix::zeros(n, n);
        let mut work = params.to_vec();
        for j in 0..n {
            let eps = 1e-5 * params[j].abs().max(1.0);
            work[j] = params[j] + eps;
            let g_plus = model.grad_nll(data, &work)?;
            work[j] = params[j] - eps;
            let g_minus = model.grad_nll(data, &work)?;
            work[j] = params[j];
            for i in 0..n {
                hessian[(i, j)] = (g_plus[i] - g_minus[i]) / (2.0 * eps);
            }
        }
        Ok((&hessian + hessian.transpose()) * 0.5)
    }
}

impl Default for MaximumLikelihoodEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Covariance quality and EDM from the Hessian and the (projected) gradient.
///
/// Quality follows the Minuit convention: 3 when the Hessian is positive
/// definite, 1 when only a diagonal approximation exists, 0 otherwise.
pub fn covariance_quality(hessian: &DMatrix<f64>, grad: &[f64]) -> (i32, f64) {
    let g = DVector::from_column_slice(grad);
    if hessian.iter().all(|v| v.is_finite())
        && let Some(chol) = hessian.clone().cholesky()
    {
        let h_inv_g = chol.solve(&g);
        return (3, (0.5 * g.dot(&h_inv_g)).max(0.0));
    }

    let diag = hessian.diagonal();
    if diag.iter().all(|d| d.is_finite() && *d > 0.0) {
        let edm = 0.5 * g.iter().zip(diag.iter()).map(|(gi, di)| gi * gi / di).sum::<f64>();
        log::warn!("Hessian is not positive definite, using diagonal approximation");
        return (1, edm);
    }

    (0, f64::INFINITY)
}
