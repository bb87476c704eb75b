//! A formula bound to its parameters, plus display attributes.

use log::debug;
use ndarray::Array1;

use crate::error::Result;
use crate::formula::{CompileError, CompiledFormula, FormulaFile};
use crate::parameters::{Parameter, ParameterSet};

/// Value given to parameters that a formula introduces without a declaration.
pub const DEFAULT_PARAMETER_VALUE: f64 = 1.0;

/// A model curve
///
/// The compiled formula always matches `parameters`: every parameter the
/// formula reads is declared in the set. A failed recompilation leaves both
/// untouched, so the curve keeps its last-known-good formula.
#[derive(Debug, Clone)]
pub struct Curve {
    name: String,
    formula: CompiledFormula,
    parameters: ParameterSet,
    visible: bool,
    z_order: i32,
    secondary_axis: bool,
}

impl Curve {
    /// Create a curve from formula text and declared parameters.
    ///
    /// Every name the formula reads must be declared in `parameters`.
    pub fn new(name: &str, source: &str, parameters: ParameterSet) -> Result<Self> {
        let formula = CompiledFormula::compile_with_parameters(source, &parameters.names())?;
        Ok(Self::assemble(name, formula, parameters))
    }

    /// Create a curve whose parameters are inferred from the formula.
    ///
    /// Each inferred parameter starts free, unbounded and at
    /// [`DEFAULT_PARAMETER_VALUE`].
    pub fn from_formula(name: &str, source: &str) -> Result<Self> {
        let formula = CompiledFormula::compile(source)?;
        let mut parameters = ParameterSet::new();
        for param_name in formula.parameter_names() {
            parameters.add(Parameter::new(param_name, DEFAULT_PARAMETER_VALUE))?;
        }
        Ok(Self::assemble(name, formula, parameters))
    }

    /// Create a curve from a parsed formula file.
    pub fn from_formula_file(name: &str, file: &FormulaFile) -> Result<Self> {
        let parameters = ParameterSet::from_declarations(&file.parameters)?;
        Self::new(name, &file.formula, parameters)
    }

    fn assemble(name: &str, formula: CompiledFormula, parameters: ParameterSet) -> Self {
        Self {
            name: name.to_string(),
            formula,
            parameters,
            visible: true,
            z_order: 0,
            secondary_axis: false,
        }
    }

    /// Recompile against the current parameters.
    ///
    /// On error the previous formula stays in effect.
    pub fn set_formula(&mut self, source: &str) -> std::result::Result<(), CompileError> {
        let formula = CompiledFormula::compile_with_parameters(source, &self.parameters.names())?;
        self.formula = formula;
        Ok(())
    }

    /// Recompile, declaring any new names the formula reads as parameters.
    ///
    /// Existing parameters keep their values and flags. On error neither the
    /// formula nor the parameters change.
    pub fn apply_formula(&mut self, source: &str) -> Result<()> {
        let inferred = CompiledFormula::compile(source)?;

        let mut parameters = self.parameters.clone();
        for param_name in inferred.parameter_names() {
            if !parameters.contains(param_name) {
                debug!("curve '{}': new parameter '{}'", self.name, param_name);
                parameters.add(Parameter::new(param_name, DEFAULT_PARAMETER_VALUE))?;
            }
        }

        self.formula = CompiledFormula::compile_with_parameters(source, &parameters.names())?;
        self.parameters = parameters;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn formula(&self) -> &CompiledFormula {
        &self.formula
    }

    pub fn source(&self) -> &str {
        self.formula.source()
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut ParameterSet {
        &mut self.parameters
    }

    /// Reset every parameter to its initial value
    pub fn reset_parameters(&mut self) {
        self.parameters.reset_all();
    }

    /// Evaluate the curve at `x` with the current parameter values.
    ///
    /// Never fails: invalid results, including a parameter that has been
    /// removed since compilation, show up as NaN.
    pub fn evaluate(&self, x: &Array1<f64>) -> Array1<f64> {
        match self.formula.bind(&self.parameters) {
            Ok(values) => self.formula.evaluate_values(x, &values),
            Err(_) => Array1::from_elem(x.len(), f64::NAN),
        }
    }

    /// Evaluate the curve at a single point.
    pub fn evaluate_point(&self, x: f64) -> f64 {
        match self.formula.bind(&self.parameters) {
            Ok(values) => self.formula.evaluate_point(x, &values),
            Err(_) => f64::NAN,
        }
    }

    /// Snapshot of the formula and current parameter values
    pub fn to_formula_file(&self) -> FormulaFile {
        FormulaFile::new(self.parameters.to_declarations(), self.formula.source())
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn z_order(&self) -> i32 {
        self.z_order
    }

    pub fn set_z_order(&mut self, z_order: i32) {
        self.z_order = z_order;
    }

    pub fn secondary_axis(&self) -> bool {
        self.secondary_axis
    }

    pub fn set_secondary_axis(&mut self, secondary_axis: bool) {
        self.secondary_axis = secondary_axis;
    }
}
