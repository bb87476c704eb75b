//! Direct minimization of the sum of squared residuals.

use std::fmt;

use log::{info, warn};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{GlobFitError, Result};
use crate::fit::Notice;
use crate::problem::Problem;
use crate::spec::GlobalFitSpec;

use super::{bfgs, cg, finite_bounds, nelder_mead, powell, spec_residuals, write_back};
use super::{CancelToken, Objective, SearchOutcome};

/// Algorithm used by a [`Minimizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MinimizeMethod {
    #[default]
    NelderMead,
    Powell,
    ConjugateGradient,
    Bfgs,
}

impl MinimizeMethod {
    /// Whether trial points are kept inside the parameter bounds.
    pub fn honours_bounds(&self) -> bool {
        matches!(self, MinimizeMethod::NelderMead | MinimizeMethod::Powell)
    }
}

impl fmt::Display for MinimizeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MinimizeMethod::NelderMead => "Nelder-Mead",
            MinimizeMethod::Powell => "Powell",
            MinimizeMethod::ConjugateGradient => "conjugate gradient",
            MinimizeMethod::Bfgs => "BFGS",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimizeConfig {
    pub method: MinimizeMethod,

    /// Objective evaluations allowed; `None` means `200 * n`
    pub max_evaluations: Option<usize>,

    /// Iterations allowed; `None` means `200 * n`
    pub max_iterations: Option<usize>,

    /// Absolute tolerance on parameter changes
    pub xatol: f64,

    /// Absolute tolerance on objective changes
    pub fatol: f64,

    /// Gradient tolerance of the gradient-based methods
    pub gtol: f64,
}

impl Default for MinimizeConfig {
    fn default() -> Self {
        Self {
            method: MinimizeMethod::default(),
            max_evaluations: None,
            max_iterations: None,
            xatol: 1e-8,
            fatol: 1e-8,
            gtol: 1e-6,
        }
    }
}

impl MinimizeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_method(mut self, method: MinimizeMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.max_evaluations = Some(max_evaluations);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_xatol(mut self, xatol: f64) -> Self {
        self.xatol = xatol;
        self
    }

    pub fn with_fatol(mut self, fatol: f64) -> Self {
        self.fatol = fatol;
        self
    }

    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.gtol = gtol;
        self
    }

    fn tolerances(&self, n: usize) -> Tolerances {
        Tolerances {
            xatol: self.xatol,
            fatol: self.fatol,
            gtol: self.gtol,
            max_iterations: self.max_iterations.unwrap_or(200 * n),
        }
    }
}

/// Stopping rules handed to the individual algorithms.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tolerances {
    pub xatol: f64,
    pub fatol: f64,
    pub gtol: f64,
    pub max_iterations: usize,
}

/// Minimizes the sum of squared residuals without error estimation.
#[derive(Debug, Clone, Default)]
pub struct Minimizer {
    config: MinimizeConfig,
}

impl Minimizer {
    pub fn new(config: MinimizeConfig) -> Self {
        Self { config }
    }

    pub fn with_method(method: MinimizeMethod) -> Self {
        Self::new(MinimizeConfig::default().with_method(method))
    }

    pub fn config(&self) -> &MinimizeConfig {
        &self.config
    }

    /// Minimize the active pairs of `spec` and write back the best vector if it
    /// improves on the start. Written-back parameters lose their error estimates.
    pub fn run(&self, spec: &mut GlobalFitSpec<'_>, cancel: &CancelToken) -> Result<SearchOutcome> {
        let (residuals, merge_notices) = spec_residuals(spec)?;
        let initial = residuals.initial_vector();
        let merged = residuals.merged();
        let (lower, upper) = (merged.lower(), merged.upper());

        info!(
            "minimizing {} point(s) over {} free parameter(s) with {}",
            residuals.n_points(),
            residuals.n_beta(),
            self.config.method
        );
        let mut outcome = self.minimize(&residuals, initial, Some((&lower, &upper)), cancel)?;
        for notice in &mut outcome.notices {
            if let Notice::BoundsIgnoredByMethod { parameters, .. } = notice {
                *parameters = merged.bounded_names();
            }
        }

        let mut notices = merge_notices;
        notices.append(&mut outcome.notices);
        outcome.notices = notices;
        write_back(spec, &residuals, &mut outcome, "minimization");
        Ok(outcome)
    }

    /// Minimize `problem` from `initial`.
    ///
    /// Nelder-Mead and Powell keep trial points inside `bounds`; the gradient
    /// methods ignore them and report a [`Notice::BoundsIgnoredByMethod`].
    pub fn minimize<P: Problem + ?Sized>(
        &self,
        problem: &P,
        initial: Array1<f64>,
        bounds: Option<(&Array1<f64>, &Array1<f64>)>,
        cancel: &CancelToken,
    ) -> Result<SearchOutcome> {
        let n = initial.len();
        if n == 0 {
            return Err(GlobFitError::InvalidInput(
                "nothing to minimize: no parameters".to_string(),
            ));
        }
        if let Some((lower, upper)) = bounds {
            if lower.len() != n || upper.len() != n {
                return Err(GlobFitError::DimensionMismatch(format!(
                    "bounds have length {} and {}, expected {}",
                    lower.len(),
                    upper.len(),
                    n
                )));
            }
        }

        let method = self.config.method;
        let bounds = finite_bounds(bounds);
        let mut notices = Vec::new();
        let bounds = if method.honours_bounds() {
            bounds
        } else {
            if bounds.is_some() {
                let notice = Notice::BoundsIgnoredByMethod {
                    method: method.to_string(),
                    parameters: Vec::new(),
                };
                warn!("{}", notice);
                notices.push(notice);
            }
            None
        };

        let max_evaluations = self.config.max_evaluations.unwrap_or(200 * n);
        let tol = self.config.tolerances(n);
        let mut obj = Objective::new(problem, cancel, bounds, max_evaluations);
        let mut iterations = 0;

        let status = match method {
            MinimizeMethod::NelderMead => nelder_mead::minimize(&mut obj, &initial, &tol, &mut iterations),
            MinimizeMethod::Powell => powell::minimize(&mut obj, &initial, &tol, &mut iterations),
            MinimizeMethod::ConjugateGradient => cg::minimize(&mut obj, &initial, &tol, &mut iterations),
            MinimizeMethod::Bfgs => bfgs::minimize(&mut obj, &initial, &tol, &mut iterations),
        };

        obj.finish(initial, iterations, status, notices)
    }
}
