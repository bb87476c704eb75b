//! Reader and writer for the formula-file format.
//!
//! ```text
//! <PARAMETERS>
//! SN, 1.0000e+00
//! slopeN, 0.0000e+00, 1
//! <FORMULA>
//! # linear baseline
//! y = SN + slopeN * x
//! ```
//!
//! Each parameter line is `name, initial_value[, fixed]` where `fixed` is `0`
//! or `1`. Everything after `<FORMULA>` is kept verbatim as formula source.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::compiled::{CompileError, CompiledFormula};
use super::expression::identifier;
use crate::error::Result;

const PARAMETERS_MARKER: &str = "<PARAMETERS>";
const FORMULA_MARKER: &str = "<FORMULA>";

/// Errors raised while reading a formula file.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaFileError {
    #[error("missing <PARAMETERS> section")]
    MissingParameters,

    #[error("missing <FORMULA> section")]
    MissingFormula,

    #[error("line {line}: {message}")]
    InvalidLine { line: usize, message: String },
}

/// One parameter line of a formula file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDeclaration {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub fixed: bool,
}

impl ParameterDeclaration {
    pub fn new(name: &str, value: f64, fixed: bool) -> Self {
        Self {
            name: name.to_string(),
            value,
            fixed,
        }
    }
}

/// Parameter declarations plus formula text.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FormulaFile {
    pub parameters: Vec<ParameterDeclaration>,
    pub formula: String,
}

impl FormulaFile {
    pub fn new(parameters: Vec<ParameterDeclaration>, formula: &str) -> Self {
        Self {
            parameters,
            formula: formula.to_string(),
        }
    }

    /// Parse the text of a formula file.
    pub fn parse(text: &str) -> std::result::Result<Self, FormulaFileError> {
        #[derive(PartialEq)]
        enum Section {
            Preamble,
            Parameters,
            Formula,
        }

        let mut section = Section::Preamble;
        let mut parameters = Vec::new();
        let mut formula_lines: Vec<&str> = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();

            if section != Section::Formula {
                if trimmed.eq_ignore_ascii_case(PARAMETERS_MARKER) {
                    section = Section::Parameters;
                    continue;
                }
                if trimmed.eq_ignore_ascii_case(FORMULA_MARKER) {
                    if section == Section::Preamble {
                        return Err(FormulaFileError::MissingParameters);
                    }
                    section = Section::Formula;
                    continue;
                }
            }

            match section {
                Section::Preamble => {
                    if !trimmed.is_empty() {
                        return Err(FormulaFileError::InvalidLine {
                            line,
                            message: format!("unexpected content before {}", PARAMETERS_MARKER),
                        });
                    }
                }
                Section::Parameters => {
                    if trimmed.is_empty() || trimmed.starts_with('#') {
                        continue;
                    }
                    parameters.push(parse_declaration(line, trimmed)?);
                }
                Section::Formula => formula_lines.push(raw.trim_end()),
            }
        }

        match section {
            Section::Preamble => Err(FormulaFileError::MissingParameters),
            Section::Parameters => Err(FormulaFileError::MissingFormula),
            Section::Formula => {
                while formula_lines.last().is_some_and(|l| l.is_empty()) {
                    formula_lines.pop();
                }
                Ok(Self {
                    parameters,
                    formula: formula_lines.join("\n"),
                })
            }
        }
    }

    /// Compile the formula against the declared parameter names.
    pub fn compile(&self) -> std::result::Result<CompiledFormula, CompileError> {
        let names: Vec<&str> = self.parameters.iter().map(|p| p.name.as_str()).collect();
        CompiledFormula::compile_with_parameters(&self.formula, &names)
    }

    /// Read and parse a formula file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text)?)
    }

    /// Write this formula file to disk.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_string())?;
        Ok(())
    }
}

impl fmt::Display for FormulaFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", PARAMETERS_MARKER)?;
        for p in &self.parameters {
            write!(f, "{}, {}", p.name, format_value(p.value))?;
            if p.fixed {
                write!(f, ", 1")?;
            }
            writeln!(f)?;
        }
        writeln!(f, "{}", FORMULA_MARKER)?;
        writeln!(f, "{}", self.formula)
    }
}

fn parse_declaration(line: usize, text: &str) -> std::result::Result<ParameterDeclaration, FormulaFileError> {
    let invalid = |message: String| FormulaFileError::InvalidLine { line, message };

    let fields: Vec<&str> = text.split(',').map(str::trim).collect();
    if fields.len() < 2 || fields.len() > 3 {
        return Err(invalid(format!(
            "expected 'name, value[, fixed]', got '{}'",
            text
        )));
    }

    let name = fields[0];
    match identifier(name) {
        Ok((rest, _)) if rest.is_empty() => {}
        _ => return Err(invalid(format!("invalid parameter name '{}'", name))),
    }

    let value = fields[1]
        .parse::<f64>()
        .map_err(|_| invalid(format!("invalid value '{}' for '{}'", fields[1], name)))?;

    let fixed = match fields.get(2) {
        None => false,
        Some(&"0") => false,
        Some(&"1") => true,
        Some(other) => {
            return Err(invalid(format!(
                "fixed flag for '{}' must be 0 or 1, got '{}'",
                name, other
            )))
        }
    };

    Ok(ParameterDeclaration::new(name, value, fixed))
}

/// Scientific notation with four decimals and a signed two-digit exponent,
/// e.g. `1.5000e+05`.
pub fn format_value(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let formatted = format!("{:.4e}", value);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => formatted,
    }
}
