//! Experimental data: x, y, optional errors, selection mask and labels.

use ndarray::Array1;

use crate::error::ConfigurationError;

/// One experimental dataset
///
/// `x` and `y` have equal length. Error arrays, the selection mask and the
/// labels are either absent or cover every point. Supplied errors must be
/// finite and strictly positive, because residuals are divided by them.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    name: String,
    x: Array1<f64>,
    y: Array1<f64>,
    x_err: Option<Array1<f64>>,
    y_err: Option<Array1<f64>>,
    selection: Option<Vec<bool>>,
    labels: Option<Vec<String>>,
}

fn invalid(message: String) -> ConfigurationError {
    ConfigurationError::InvalidDataSet(message)
}

fn check_errors(name: &str, kind: &str, errors: &Array1<f64>, len: usize) -> Result<(), ConfigurationError> {
    if errors.len() != len {
        return Err(invalid(format!(
            "'{}': {} has {} entries for {} points",
            name,
            kind,
            errors.len(),
            len
        )));
    }
    if let Some(idx) = errors.iter().position(|e| !(e.is_finite() && *e > 0.0)) {
        return Err(invalid(format!(
            "'{}': {} at point {} must be finite and positive, got {}",
            name, kind, idx, errors[idx]
        )));
    }
    Ok(())
}

impl DataSet {
    /// Create a dataset from x and y arrays of equal length
    pub fn new(name: &str, x: Array1<f64>, y: Array1<f64>) -> Result<Self, ConfigurationError> {
        if x.len() != y.len() {
            return Err(invalid(format!(
                "'{}': x has {} points but y has {}",
                name,
                x.len(),
                y.len()
            )));
        }
        Ok(Self {
            name: name.to_string(),
            x,
            y,
            x_err: None,
            y_err: None,
            selection: None,
            labels: None,
        })
    }

    /// Attach per-point y-errors
    pub fn with_y_errors(mut self, y_err: Array1<f64>) -> Result<Self, ConfigurationError> {
        check_errors(&self.name, "y-error", &y_err, self.len())?;
        self.y_err = Some(y_err);
        Ok(self)
    }

    /// Attach per-point x-errors; fits of this dataset then use orthogonal distance
    pub fn with_x_errors(mut self, x_err: Array1<f64>) -> Result<Self, ConfigurationError> {
        check_errors(&self.name, "x-error", &x_err, self.len())?;
        self.x_err = Some(x_err);
        Ok(self)
    }

    /// Restrict fits to the points marked `true`
    pub fn with_selection(mut self, selection: Vec<bool>) -> Result<Self, ConfigurationError> {
        if selection.len() != self.len() {
            return Err(invalid(format!(
                "'{}': selection has {} entries for {} points",
                self.name,
                selection.len(),
                self.len()
            )));
        }
        self.selection = Some(selection);
        Ok(self)
    }

    /// Attach one label per point
    pub fn with_labels(mut self, labels: Vec<String>) -> Result<Self, ConfigurationError> {
        if labels.len() != self.len() {
            return Err(invalid(format!(
                "'{}': {} labels for {} points",
                self.name,
                labels.len(),
                self.len()
            )));
        }
        self.labels = Some(labels);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn x(&self) -> &Array1<f64> {
        &self.x
    }

    pub fn y(&self) -> &Array1<f64> {
        &self.y
    }

    pub fn x_errors(&self) -> Option<&Array1<f64>> {
        self.x_err.as_ref()
    }

    pub fn y_errors(&self) -> Option<&Array1<f64>> {
        self.y_err.as_ref()
    }

    pub fn has_x_errors(&self) -> bool {
        self.x_err.is_some()
    }

    pub fn has_y_errors(&self) -> bool {
        self.y_err.is_some()
    }

    pub fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }

    pub fn selection(&self) -> Option<&[bool]> {
        self.selection.as_deref()
    }

    /// Replace the selection mask; `None` selects every point
    pub fn set_selection(&mut self, selection: Option<Vec<bool>>) -> Result<(), ConfigurationError> {
        if let Some(mask) = &selection {
            if mask.len() != self.len() {
                return Err(invalid(format!(
                    "'{}': selection has {} entries for {} points",
                    self.name,
                    mask.len(),
                    self.len()
                )));
            }
        }
        self.selection = selection;
        Ok(())
    }

    /// Whether point `idx` is selected by the mask
    pub fn is_selected(&self, idx: usize) -> bool {
        match &self.selection {
            Some(mask) => mask.get(idx).copied().unwrap_or(false),
            None => idx < self.len(),
        }
    }

    /// Indices of the points a fit uses: selected, with finite x and y.
    pub fn active_indices(&self) -> Vec<usize> {
        (0..self.len())
            .filter(|&i| self.is_selected(i) && self.x[i].is_finite() && self.y[i].is_finite())
            .collect()
    }

    /// Number of points a fit uses
    pub fn n_active(&self) -> usize {
        self.active_indices().len()
    }
}
