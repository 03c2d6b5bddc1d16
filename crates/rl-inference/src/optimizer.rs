//! Optimization algorithms
//!
//! Thin wrappers around argmin solvers with box constraints applied by
//! clamping. The solver is picked by family/algorithm name so that the
//! process-wide [`crate::minimizer`] defaults can select it.

use crate::minimizer::MinimizerDefaults;
use argmin::core::{
    CostFunction, Executor, Gradient, IterState, Solver, State, TerminationReason,
    TerminationStatus,
};
use argmin::solver::linesearch::{HagerZhangLineSearch, MoreThuenteLineSearch};
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
use rl_core::{Error, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Configuration shared by all solvers
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Maximum number of iterations
    pub max_iter: u64,
    /// Convergence tolerance (gradient norm for L-BFGS, cost spread for Nelder-Mead)
    pub tol: f64,
    /// Number of corrections to approximate inverse Hessian
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-6, m: 10 }
    }
}

/// Line search used inside L-BFGS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSearchKind {
    /// More-Thuente (default)
    MoreThuente,
    /// Hager-Zhang
    HagerZhang,
}

/// Solver selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinimizerKind {
    /// Limited-memory BFGS with projected gradients
    Lbfgs(LineSearchKind),
    /// Derivative-free simplex
    NelderMead,
}

impl MinimizerKind {
    /// Resolve family/algorithm names (case-insensitive). An empty algorithm
    /// picks the family default.
    pub fn from_names(family: &str, algorithm: &str) -> Result<Self> {
        let family_lc = family.to_ascii_lowercase();
        let algo_lc = algorithm.to_ascii_lowercase();
        match family_lc.as_str() {
            "lbfgs" | "l-bfgs" | "lbfgsb" | "l-bfgs-b" => match algo_lc.as_str() {
                "" | "morethuente" => Ok(Self::Lbfgs(LineSearchKind::MoreThuente)),
                "hagerzhang" => Ok(Self::Lbfgs(LineSearchKind::HagerZhang)),
                _ => Err(Error::Validation(format!(
                    "unknown algorithm '{algorithm}' for minimizer family '{family}'"
                ))),
            },
            "neldermead" | "simplex" => match algo_lc.as_str() {
                "" | "neldermead" | "simplex" => Ok(Self::NelderMead),
                _ => Err(Error::Validation(format!(
                    "unknown algorithm '{algorithm}' for minimizer family '{family}'"
                ))),
            },
            _ => Err(Error::Validation(format!("unknown minimizer family '{family}'"))),
        }
    }

    /// Resolve the solver named by process-wide defaults
    pub fn from_defaults(defaults: &MinimizerDefaults) -> Result<Self> {
        Self::from_names(&defaults.family, &defaults.algorithm)
    }
}

/// Result of optimization
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best-fit parameters
    pub parameters: Vec<f64>,
    /// Function value at minimum
    pub fval: f64,
    /// Number of iterations
    pub n_iter: u64,
    /// Number of objective (cost) evaluations.
    pub n_fev: usize,
    /// Number of gradient evaluations.
    pub n_gev: usize,
    /// Convergence status
    pub converged: bool,
    /// Termination message
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

/// Objective function trait for optimization
pub trait ObjectiveFunction {
    /// Evaluate function at given parameters
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Compute gradient at given parameters (numerical if not overridden)
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let n = params.len();
        let mut grad = vec![0.0; n];

        for i in 0..n {
            let eps = 1e-8 * params[i].abs().max(1.0);

            let mut params_plus = params.to_vec();
            params_plus[i] += eps;
            let f_plus = self.eval(&params_plus)?;

            let mut params_minus = params.to_vec();
            params_minus[i] -= eps;
            let f_minus = self.eval(&params_minus)?;

            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }

        Ok(grad)
    }
}

/// Wrapper to make ObjectiveFunction compatible with argmin
struct ArgminProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
    counts: Arc<FuncCounts>,
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

/// Zero gradient components that would push a parameter sitting on a bound further out.
pub(crate) fn project_gradient(params: &[f64], grad: &mut [f64], bounds: &[(f64, f64)]) {
    const EPS: f64 = 1e-12;
    for (i, (&x, &(lo, hi))) in params.iter().zip(bounds.iter()).enumerate() {
        if x <= lo + EPS && grad[i] > 0.0 {
            grad[i] = 0.0;
        }
        if x >= hi - EPS && grad[i] < 0.0 {
            grad[i] = 0.0;
        }
    }
}

#[derive(Default)]
struct FuncCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

impl CostFunction for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        self.objective.eval(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl Gradient for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        let mut g = self
            .objective
            .gradient(&clamped)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))?;

        // Stepping into the flat clamped region stalls the line search.
        project_gradient(&clamped, &mut g, self.bounds);

        Ok(g)
    }
}

/// Solver-independent view of the final argmin state.
struct Finished {
    best: Vec<f64>,
    fval: f64,
    n_iter: u64,
    converged: bool,
    message: String,
}

fn finished_from<I>(state: &I) -> Result<Finished>
where
    I: State<Param = Vec<f64>, Float = f64>,
{
    let best = state
        .get_best_param()
        .ok_or_else(|| Error::Computation("No best parameters found".to_string()))?
        .clone();
    let termination = state.get_termination_status();
    let converged = matches!(
        termination,
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
            | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
    );
    Ok(Finished {
        best,
        fval: state.get_best_cost(),
        n_iter: state.get_iter(),
        converged,
        message: termination.to_string(),
    })
}

type GradientState = IterState<Vec<f64>, Vec<f64>, (), (), (), f64>;

fn run_gradient_solver<'a, S>(
    problem: ArgminProblem<'a>,
    solver: S,
    init: Vec<f64>,
    max_iter: u64,
) -> Result<Finished>
where
    S: Solver<ArgminProblem<'a>, GradientState>,
{
    let res = Executor::new(problem, solver)
        .configure(|state| state.param(init).max_iters(max_iter))
        .run()
        .map_err(|e| Error::Computation(format!("Optimization failed: {}", e)))?;
    finished_from(res.state())
}

/// Initial simplex: the start point plus one vertex per coordinate, stepped inward.
fn initial_simplex(init: &[f64], bounds: &[(f64, f64)]) -> Vec<Vec<f64>> {
    let mut vertices = vec![init.to_vec()];
    for (i, (&x, &(lo, hi))) in init.iter().zip(bounds).enumerate() {
        let mut step = 0.1 * x.abs().max(1.0);
        if hi > lo && (hi - lo).is_finite() {
            step = step.min(0.25 * (hi - lo));
        }
        let mut v = init.to_vec();
        v[i] = if x + step <= hi { x + step } else { x - step };
        vertices.push(v);
    }
    vertices
}

/// Bounded minimizer dispatching to the selected argmin solver
pub struct Minimizer {
    kind: MinimizerKind,
    config: OptimizerConfig,
}

impl Minimizer {
    /// Create a minimizer of the given kind
    pub fn new(kind: MinimizerKind, config: OptimizerConfig) -> Self {
        Self { kind, config }
    }

    /// Minimize objective function with bounds
    ///
    /// # Arguments
    /// * `objective` - Objective function to minimize
    /// * `init_params` - Initial parameter values
    /// * `bounds` - Parameter bounds as (lower, upper) for each parameter;
    ///   `lo == hi` fixes a parameter
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init_params.len() != bounds.len() {
            return Err(Error::Validation(format!(
                "Parameter and bounds length mismatch: {} != {}",
                init_params.len(),
                bounds.len()
            )));
        }

        let init_clamped = clamp_params(init_params, bounds);

        // Nothing free to move: evaluate once.
        if bounds.iter().all(|&(lo, hi)| lo == hi) {
            let fval = objective.eval(&init_clamped)?;
            return Ok(OptimizationResult {
                parameters: init_clamped,
                fval,
                n_iter: 0,
                n_fev: 1,
                n_gev: 0,
                converged: true,
                message: "all parameters fixed".to_string(),
            });
        }

        let counts = Arc::new(FuncCounts::default());
        let problem = ArgminProblem { objective, bounds, counts: counts.clone() };

        let finished = match self.kind {
            MinimizerKind::Lbfgs(line_search) => {
                // Argmin's default cost tolerance is ~EPS, far stricter than NLL scales need.
                let tol_cost =
                    if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
                match line_search {
                    LineSearchKind::MoreThuente => {
                        let solver = LBFGS::new(MoreThuenteLineSearch::new(), self.config.m)
                            .with_tolerance_grad(self.config.tol)
                            .and_then(|s| s.with_tolerance_cost(tol_cost))
                            .map_err(|e| {
                                Error::Validation(format!("Invalid optimizer configuration: {e}"))
                            })?;
                        run_gradient_solver(problem, solver, init_clamped, self.config.max_iter)?
                    }
                    LineSearchKind::HagerZhang => {
                        let solver = LBFGS::new(HagerZhangLineSearch::new(), self.config.m)
                            .with_tolerance_grad(self.config.tol)
                            .and_then(|s| s.with_tolerance_cost(tol_cost))
                            .map_err(|e| {
                                Error::Validation(format!("Invalid optimizer configuration: {e}"))
                            })?;
                        run_gradient_solver(problem, solver, init_clamped, self.config.max_iter)?
                    }
                }
            }
            MinimizerKind::NelderMead => {
                let solver = NelderMead::new(initial_simplex(&init_clamped, bounds))
                    .with_sd_tolerance(self.config.tol)
                    .map_err(|e| {
                        Error::Validation(format!("Invalid optimizer configuration: {e}"))
                    })?;
                let res = Executor::new(problem, solver)
                    .configure(|state| state.max_iters(self.config.max_iter))
                    .run()
                    .map_err(|e| Error::Computation(format!("Optimization failed: {}", e)))?;
                finished_from(res.state())?
            }
        };

        Ok(OptimizationResult {
            parameters: clamp_params(&finished.best, bounds),
            fval: finished.fval,
            n_iter: finished.n_iter,
            n_fev: counts.cost.load(Ordering::Relaxed),
            n_gev: counts.grad.load(Ordering::Relaxed),
            converged: finished.converged,
            message: finished.message,
        })
    }
}

impl Default for Minimizer {
    fn default() -> Self {
        Self::new(MinimizerKind::Lbfgs(LineSearchKind::MoreThuente), OptimizerConfig::default())
    }
}
