//! Residual assembly for global fits.
//!
//! The residual vector of a global fit is the concatenation, in declaration
//! order, of one block per active dataset/curve pair. For each selected point
//!
//! ```text
//! r_i = (f(x_i; beta) - y_i) / sigma_y_i        (sigma_y_i = 1 without y-errors)
//! ```
//!
//! In orthogonal-distance mode every point of a dataset with x-errors gets an
//! extra unknown `delta_i`, the horizontal offset of the point on the curve:
//!
//! ```text
//! r_i       = (f(x_i + delta_i; beta) - y_i) / sigma_y_i
//! r_{n + k} = delta_i / sigma_x_i
//! ```
//!
//! The optimized vector is then `[beta; delta]`. Datasets without x-errors keep
//! `delta = 0` and contribute no extra unknowns.

use log::debug;
use ndarray::{s, Array1, Array2, ArrayView1, Axis};

use crate::error::{ConfigurationError, Result};
use crate::formula::CompiledFormula;
use crate::problem::Problem;
use crate::registry::MergedParameters;
use crate::spec::GlobalFitSpec;
use crate::utils::finite_difference::{step_size, FORWARD_EPSILON};

/// How residuals are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidualMode {
    /// Vertical distance only
    Ordinary,
    /// Orthogonal distance, with one offset per point of datasets with x-errors
    Orthogonal,
}

/// Selected points of one active pair.
#[derive(Debug, Clone)]
pub struct AssembledData {
    /// Index of the curve among the merged curves
    pub curve: usize,
    pub curve_name: String,
    pub x: Array1<f64>,
    pub y: Array1<f64>,
    pub sigma_y: Option<Array1<f64>>,
    pub sigma_x: Option<Array1<f64>>,
    /// Start of this block's offsets within the delta part, in orthogonal mode
    pub delta_offset: Option<usize>,
}

impl AssembledData {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Builds a [`ResidualFunction`] from a [`GlobalFitSpec`].
pub struct ResidualAssembler;

impl ResidualAssembler {
    /// Merge parameters and assemble residuals, choosing orthogonal mode when
    /// any active dataset has x-errors.
    pub fn build(spec: &GlobalFitSpec<'_>) -> std::result::Result<ResidualFunction, ConfigurationError> {
        let (merged, _) = spec.merge()?;
        let mode = if spec.has_x_errors() {
            ResidualMode::Orthogonal
        } else {
            ResidualMode::Ordinary
        };
        Self::build_with(spec, merged, mode)
    }

    /// Assemble residuals for an already merged parameter layout.
    pub fn build_with(
        spec: &GlobalFitSpec<'_>,
        merged: MergedParameters,
        mode: ResidualMode,
    ) -> std::result::Result<ResidualFunction, ConfigurationError> {
        let mut blocks = Vec::new();
        let mut formulas = Vec::new();
        let mut n_points = 0;
        let mut n_delta = 0;

        for (ci, pair) in spec.active_pairs().enumerate() {
            formulas.push(pair.curve.formula().clone());

            let data = pair.dataset;
            let idx = data.active_indices();
            let select = |arr: &Array1<f64>| arr.select(Axis(0), &idx);

            let sigma_x = data.x_errors().map(select);
            let delta_offset = match (mode, &sigma_x) {
                (ResidualMode::Orthogonal, Some(_)) => {
                    let offset = n_delta;
                    n_delta += idx.len();
                    Some(offset)
                }
                _ => None,
            };

            n_points += idx.len();
            blocks.push(AssembledData {
                curve: ci,
                curve_name: pair.curve.name().to_string(),
                x: select(data.x()),
                y: select(data.y()),
                sigma_y: data.y_errors().map(select),
                sigma_x: if mode == ResidualMode::Orthogonal { sigma_x } else { None },
                delta_offset,
            });
        }

        if n_points == 0 {
            return Err(ConfigurationError::NoActivePoints);
        }

        debug!(
            "assembled {} residual block(s): {} points, {} free parameters, {} offsets",
            blocks.len(),
            n_points,
            merged.len(),
            n_delta
        );

        Ok(ResidualFunction {
            n_beta: merged.len(),
            blocks,
            formulas,
            merged,
            mode,
            n_points,
            n_delta,
        })
    }
}

/// Residuals of a global fit as a function of the optimized vector.
#[derive(Debug, Clone)]
pub struct ResidualFunction {
    blocks: Vec<AssembledData>,
    formulas: Vec<CompiledFormula>,
    merged: MergedParameters,
    mode: ResidualMode,
    n_beta: usize,
    n_points: usize,
    n_delta: usize,
}

impl ResidualFunction {
    pub fn mode(&self) -> ResidualMode {
        self.mode
    }

    pub fn merged(&self) -> &MergedParameters {
        &self.merged
    }

    pub fn blocks(&self) -> &[AssembledData] {
        &self.blocks
    }

    /// Number of data points (residuals excluding offset penalties)
    pub fn n_points(&self) -> usize {
        self.n_points
    }

    /// Number of free model parameters
    pub fn n_beta(&self) -> usize {
        self.n_beta
    }

    /// Number of orthogonal offsets
    pub fn n_delta(&self) -> usize {
        self.n_delta
    }

    /// Whether every block carries y-errors
    pub fn has_y_errors(&self) -> bool {
        self.blocks.iter().all(|b| b.sigma_y.is_some())
    }

    /// Starting vector: merged initial values, then zero offsets.
    pub fn initial_vector(&self) -> Array1<f64> {
        let mut v = Array1::zeros(self.n_beta + self.n_delta);
        v.slice_mut(s![..self.n_beta])
            .assign(&self.merged.initial_vector());
        v
    }

    /// The model-parameter part of a full vector.
    pub fn beta<'v>(&self, params: &'v Array1<f64>) -> ArrayView1<'v, f64> {
        params.slice(s![..self.n_beta])
    }

    /// Evaluation inputs per block: `x`, shifted by the offsets where present.
    fn inputs(&self, params: &Array1<f64>) -> Vec<Array1<f64>> {
        self.blocks
            .iter()
            .map(|block| match block.delta_offset {
                Some(offset) => {
                    let start = self.n_beta + offset;
                    let delta = params.slice(s![start..start + block.len()]);
                    &block.x + &delta
                }
                None => block.x.clone(),
            })
            .collect()
    }

    fn models_at(&self, beta: &[f64], inputs: &[Array1<f64>]) -> Vec<Array1<f64>> {
        self.blocks
            .iter()
            .zip(inputs)
            .map(|(block, input)| {
                let values = self.merged.curve_values(block.curve, beta);
                self.formulas[block.curve].evaluate_values(input, &values)
            })
            .collect()
    }

    /// Model values per block at the (possibly shifted) evaluation points.
    pub fn model_values(&self, params: &Array1<f64>) -> Vec<Array1<f64>> {
        let beta = self.beta(params).to_vec();
        let inputs = self.inputs(params);
        self.models_at(&beta, &inputs)
    }

    fn weighted(&self, block: &AssembledData, model: &Array1<f64>) -> Array1<f64> {
        let diff = model - &block.y;
        match &block.sigma_y {
            Some(sigma) => diff / sigma,
            None => diff,
        }
    }

    /// Residual vector for the full optimized vector.
    pub fn residuals(&self, params: &Array1<f64>) -> Array1<f64> {
        let models = self.model_values(params);
        let mut out = Array1::zeros(self.n_points + self.n_delta);

        let mut row = 0;
        for (block, model) in self.blocks.iter().zip(&models) {
            let r = self.weighted(block, model);
            out.slice_mut(s![row..row + block.len()]).assign(&r);
            row += block.len();
        }

        for block in &self.blocks {
            if let (Some(offset), Some(sigma_x)) = (block.delta_offset, &block.sigma_x) {
                let start = self.n_beta + offset;
                let delta = params.slice(s![start..start + block.len()]);
                let row = self.n_points + offset;
                out.slice_mut(s![row..row + block.len()])
                    .assign(&(&delta / sigma_x));
            }
        }

        out
    }

    /// Non-finite model values per curve, in block order.
    pub fn invalid_counts(&self, params: &Array1<f64>) -> Vec<(String, usize)> {
        self.blocks
            .iter()
            .zip(self.model_values(params))
            .map(|(block, model)| {
                (
                    block.curve_name.clone(),
                    model.iter().filter(|v| !v.is_finite()).count(),
                )
            })
            .collect()
    }

    /// Structured Jacobian of the orthogonal-distance residuals.
    ///
    /// Model-parameter columns come from forward differences; each offset
    /// column has one model-derivative entry and one `1/sigma_x` entry.
    /// Costs one model evaluation per free parameter plus one.
    fn orthogonal_jacobian(&self, params: &Array1<f64>) -> Array2<f64> {
        let n_rows = self.n_points + self.n_delta;
        let mut jac = Array2::zeros((n_rows, self.n_beta + self.n_delta));

        let beta = self.beta(params).to_vec();
        let inputs = self.inputs(params);
        let base = self.models_at(&beta, &inputs);

        let mut probe = beta.clone();
        for j in 0..self.n_beta {
            let h = step_size(beta[j], FORWARD_EPSILON);
            probe[j] = beta[j] + h;
            let h = probe[j] - beta[j];
            let shifted = self.models_at(&probe, &inputs);
            probe[j] = beta[j];

            let mut row = 0;
            for ((block, m0), m1) in self.blocks.iter().zip(&base).zip(&shifted) {
                for i in 0..block.len() {
                    let sigma = block.sigma_y.as_ref().map_or(1.0, |s| s[i]);
                    jac[[row + i, j]] = (m1[i] - m0[i]) / h / sigma;
                }
                row += block.len();
            }
        }

        let steps: Vec<Array1<f64>> = inputs
            .iter()
            .map(|input| input.mapv(|u| step_size(u, FORWARD_EPSILON)))
            .collect();
        let moved: Vec<Array1<f64>> = inputs.iter().zip(&steps).map(|(u, h)| u + h).collect();
        let slopes = self.models_at(&beta, &moved);

        let mut row = 0;
        for (bi, block) in self.blocks.iter().enumerate() {
            if let (Some(offset), Some(sigma_x)) = (block.delta_offset, &block.sigma_x) {
                for i in 0..block.len() {
                    let col = self.n_beta + offset + i;
                    let h = moved[bi][i] - inputs[bi][i];
                    let sigma_y = block.sigma_y.as_ref().map_or(1.0, |s| s[i]);
                    jac[[row + i, col]] = (slopes[bi][i] - base[bi][i]) / h / sigma_y;
                    jac[[self.n_points + offset + i, col]] = 1.0 / sigma_x[i];
                }
            }
            row += block.len();
        }

        jac
    }
}

impl Problem for ResidualFunction {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        Ok(self.residuals(params))
    }

    fn parameter_count(&self) -> usize {
        self.n_beta + self.n_delta
    }

    fn residual_count(&self) -> usize {
        self.n_points + self.n_delta
    }

    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        match self.mode {
            ResidualMode::Orthogonal => Ok(self.orthogonal_jacobian(params)),
            ResidualMode::Ordinary => crate::utils::finite_difference::jacobian(self, params, None),
        }
    }

    fn has_custom_jacobian(&self) -> bool {
        self.mode == ResidualMode::Orthogonal
    }
}
