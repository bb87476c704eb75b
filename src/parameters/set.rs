//! Ordered parameter collection of a single curve.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::formula::expression::identifier;
use crate::formula::{EvaluationContext, ParameterDeclaration, INPUT_NAME, OUTPUT_NAME};
use crate::parameters::parameter::{Parameter, ParameterError};

/// The parameters of one curve, in declaration order
///
/// Names are unique within a set and never `x` or `y`. The same name may appear
/// in the sets of several curves; that is what makes it a shared parameter in a
/// global fit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Parameter>", into = "Vec<Parameter>")]
pub struct ParameterSet {
    params: Vec<Parameter>,
}

impl TryFrom<Vec<Parameter>> for ParameterSet {
    type Error = ParameterError;

    fn try_from(params: Vec<Parameter>) -> std::result::Result<Self, Self::Error> {
        let mut set = ParameterSet::new();
        for param in params {
            set.add(param)?;
        }
        Ok(set)
    }
}

impl From<ParameterSet> for Vec<Parameter> {
    fn from(set: ParameterSet) -> Self {
        set.params
    }
}

/// Check that `name` can be used as a parameter name.
pub fn validate_name(name: &str) -> std::result::Result<(), ParameterError> {
    if name == INPUT_NAME || name == OUTPUT_NAME {
        return Err(ParameterError::ReservedName {
            name: name.to_string(),
        });
    }
    match identifier(name) {
        Ok((rest, _)) if rest.is_empty() => Ok(()),
        _ => Err(ParameterError::InvalidName {
            name: name.to_string(),
        }),
    }
}

impl ParameterSet {
    /// Create a new empty parameter set
    ///
    /// ```
    /// use globfit_rs::parameters::ParameterSet;
    ///
    /// let params = ParameterSet::new();
    /// assert!(params.is_empty());
    /// ```
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    /// Build a set from formula-file declarations
    pub fn from_declarations(
        declarations: &[ParameterDeclaration],
    ) -> std::result::Result<Self, ParameterError> {
        let mut set = Self::new();
        for decl in declarations {
            let mut param = Parameter::new(&decl.name, decl.value);
            param.set_fixed(decl.fixed);
            set.add(param)?;
        }
        Ok(set)
    }

    /// Declarations describing the current values, for writing a formula file
    pub fn to_declarations(&self) -> Vec<ParameterDeclaration> {
        self.params
            .iter()
            .map(|p| ParameterDeclaration::new(p.name(), p.value(), p.fixed()))
            .collect()
    }

    /// Append a parameter
    ///
    /// Fails on a reserved or malformed name, a duplicate, or a non-finite value.
    pub fn add(&mut self, param: Parameter) -> std::result::Result<(), ParameterError> {
        validate_name(param.name())?;
        if !param.value().is_finite() {
            return Err(ParameterError::NonFiniteValue {
                name: param.name().to_string(),
                value: param.value(),
            });
        }
        if self.contains(param.name()) {
            return Err(ParameterError::DuplicateParameter {
                name: param.name().to_string(),
            });
        }
        self.params.push(param);
        Ok(())
    }

    /// Append a free, unbounded parameter
    pub fn add_param(&mut self, name: &str, value: f64) -> std::result::Result<(), ParameterError> {
        self.add(Parameter::new(name, value))
    }

    /// Append a free parameter with bounds
    pub fn add_param_with_bounds(
        &mut self,
        name: &str,
        value: f64,
        min: f64,
        max: f64,
    ) -> std::result::Result<(), ParameterError> {
        self.add(Parameter::with_bounds(name, value, min, max)?)
    }

    /// Append a fixed parameter
    pub fn add_fixed(&mut self, name: &str, value: f64) -> std::result::Result<(), ParameterError> {
        self.add(Parameter::fixed_at(name, value))
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.iter_mut().find(|p| p.name() == name)
    }

    /// Like [`get_mut`](Self::get_mut) but with an error for unknown names
    pub fn require_mut(&mut self, name: &str) -> std::result::Result<&mut Parameter, ParameterError> {
        self.get_mut(name).ok_or_else(|| ParameterError::ParameterNotFound {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove a parameter, keeping the order of the rest
    pub fn remove(&mut self, name: &str) -> Option<Parameter> {
        let idx = self.params.iter().position(|p| p.name() == name)?;
        Some(self.params.remove(idx))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Names in declaration order
    pub fn names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Parameter> {
        self.params.iter_mut()
    }

    /// Current values in declaration order
    pub fn values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.value()).collect()
    }

    /// Parameters that vary during a fit
    pub fn free(&self) -> Vec<&Parameter> {
        self.params.iter().filter(|p| !p.fixed()).collect()
    }

    /// Parameters held constant during a fit
    pub fn fixed(&self) -> Vec<&Parameter> {
        self.params.iter().filter(|p| p.fixed()).collect()
    }

    /// Reset every parameter to its initial value
    pub fn reset_all(&mut self) {
        for param in &mut self.params {
            param.reset();
        }
    }

    /// Forget every error estimate
    pub fn clear_errors(&mut self) {
        for param in &mut self.params {
            param.clear_errors();
        }
    }

    /// Serialize to a pretty-printed JSON array
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON, validating names and values
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Save parameters to a JSON file
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Load parameters from a JSON file
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Self::from_json(&contents)
    }
}

impl EvaluationContext for ParameterSet {
    fn get_variable(&self, name: &str) -> Option<f64> {
        self.get(name).map(|p| p.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::CompiledFormula;
    use ndarray::array;

    #[test]
    fn test_add_and_order() {
        let mut params = ParameterSet::new();
        params.add_param("b", 2.0).unwrap();
        params.add_param_with_bounds("a", 5.0, 0.0, 1.0).unwrap();
        params.add_fixed("c", 3.0).unwrap();

        assert_eq!(params.names(), vec!["b", "a", "c"]);
        assert_eq!(params.values(), vec![2.0, 1.0, 3.0]);
        assert_eq!(params.free().len(), 2);
        assert_eq!(params.fixed()[0].name(), "c");
    }

    #[test]
    fn test_rejected_names() {
        let mut params = ParameterSet::new();
        params.add_param("k", 1.0).unwrap();

        assert_eq!(
            params.add_param("k", 2.0),
            Err(ParameterError::DuplicateParameter { name: "k".to_string() })
        );
        assert_eq!(
            params.add_param("x", 2.0),
            Err(ParameterError::ReservedName { name: "x".to_string() })
        );
        assert_eq!(
            params.add_param("y", 2.0),
            Err(ParameterError::ReservedName { name: "y".to_string() })
        );
        assert!(matches!(
            params.add_param("2k", 1.0),
            Err(ParameterError::InvalidName { .. })
        ));
        assert!(matches!(
            params.add_param("n", f64::NAN),
            Err(ParameterError::NonFiniteValue { .. })
        ));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_reset_all() {
        let mut params = ParameterSet::new();
        params.add_param("a", 1.0).unwrap();
        params.add_param("b", 2.0).unwrap();
        params.get_mut("a").unwrap().set_value(10.0).unwrap();
        params.get_mut("b").unwrap().set_errors(Some(0.1), None);

        params.reset_all();
        assert_eq!(params.values(), vec![1.0, 2.0]);
        assert!(params.get("b").unwrap().error_posteriori().is_none());
    }

    #[test]
    fn test_evaluation_context() {
        let mut params = ParameterSet::new();
        params.add_param("SN", 1.0).unwrap();
        params.add_fixed("slopeN", 0.5).unwrap();

        let formula = CompiledFormula::compile("y = SN + slopeN * x").unwrap();
        let y = formula.evaluate(&array![0.0, 2.0], &params).unwrap();
        assert_eq!(y, array![1.0, 2.0]);
    }

    #[test]
    fn test_json_round_trip() {
        let mut params = ParameterSet::new();
        params.add_param_with_bounds("k", 0.5, 0.0, f64::INFINITY).unwrap();
        params.add_fixed("c", 3.0).unwrap();

        let json = params.to_json().unwrap();
        let loaded = ParameterSet::from_json(&json).unwrap();
        assert_eq!(loaded, params);

        // Duplicates are rejected on load
        let dup = r#"[{"name":"k","value":1.0,"init_value":1.0},{"name":"k","value":2.0,"init_value":2.0}]"#;
        assert!(ParameterSet::from_json(dup).is_err());
    }

    #[test]
    fn test_declarations() {
        let decls = vec![
            ParameterDeclaration::new("SN", 1.0, false),
            ParameterDeclaration::new("slopeN", 0.0, true),
        ];
        let params = ParameterSet::from_declarations(&decls).unwrap();
        assert!(params.get("slopeN").unwrap().fixed());
        assert_eq!(params.to_declarations(), decls);
    }
}
