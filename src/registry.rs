//! Parameter registry: merges the parameters of several curves into one
//! optimization vector.
//!
//! Every distinct non-fixed name of the active curves gets exactly one free
//! slot, however many curves read it. A name used by two or more curves is a
//! *shared* parameter:
//!
//! - its bounds are the intersection of the contributing bounds; an empty
//!   intersection is a configuration error;
//! - it must be fixed everywhere or free everywhere;
//! - its starting value comes from the first curve that declares it, and a
//!   disagreeing value elsewhere is reported as a notice.
//!
//! Fixed parameters never get a slot. Each curve evaluates with its own fixed
//! value.

use log::{debug, warn};
use ndarray::Array1;

use crate::curve::Curve;
use crate::error::ConfigurationError;
use crate::fit::Notice;
use crate::formula::CompiledFormula;
use crate::parameters::Bounds;

/// The parameter names a compiled formula reads, in slot order.
pub fn declared_names(formula: &CompiledFormula) -> Vec<String> {
    formula.parameter_names().to_vec()
}

/// Where a formula parameter takes its value from during optimization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamSource {
    /// Index into the free vector
    Free(usize),
    /// Constant supplied from the curve's fixed parameter
    Fixed(f64),
}

/// One entry of the free vector.
#[derive(Debug, Clone, PartialEq)]
pub struct FreeSlot {
    pub name: String,
    pub initial: f64,
    pub bounds: Bounds,
    /// Indices (among the merged curves) of every curve that reads this slot
    pub curves: Vec<usize>,
}

impl FreeSlot {
    pub fn is_shared(&self) -> bool {
        self.curves.len() > 1
    }
}

/// Result of merging the parameters of the active curves.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedParameters {
    slots: Vec<FreeSlot>,
    /// Per merged curve, one source per formula parameter
    sources: Vec<Vec<ParamSource>>,
    /// Per merged curve, the names behind `sources`
    names: Vec<Vec<String>>,
}

/// Merge the parameters of `curves`, given in declaration order.
///
/// Returns the layout plus notices about mismatched shared starting values and
/// declared-but-unused parameters.
pub fn merge(curves: &[&Curve]) -> Result<(MergedParameters, Vec<Notice>), ConfigurationError> {
    let mut notices = Vec::new();
    let mut slots: Vec<FreeSlot> = Vec::new();
    let mut sources = Vec::with_capacity(curves.len());
    let mut names = Vec::with_capacity(curves.len());
    // (first curve, fixed?) of every name seen so far
    let mut seen: Vec<(String, usize, bool)> = Vec::new();

    for (ci, curve) in curves.iter().enumerate() {
        let formula_names = declared_names(curve.formula());

        let unused: Vec<String> = curve
            .parameters()
            .names()
            .into_iter()
            .filter(|name| !formula_names.contains(name))
            .collect();
        if !unused.is_empty() {
            warn!(
                "curve '{}': parameters not used by the formula: {}",
                curve.name(),
                unused.join(", ")
            );
            notices.push(Notice::UnusedParameters {
                curve: curve.name().to_string(),
                names: unused,
            });
        }

        let mut curve_sources = Vec::with_capacity(formula_names.len());
        for name in &formula_names {
            let param = curve.parameters().get(name).ok_or_else(|| {
                ConfigurationError::MissingParameter {
                    curve: curve.name().to_string(),
                    name: name.clone(),
                }
            })?;

            let prior = seen
                .iter()
                .find(|(n, _, _)| n == name)
                .map(|(_, first, was_fixed)| (*first, *was_fixed));
            if let Some((first, was_fixed)) = prior {
                if was_fixed != param.fixed() {
                    let (fixed_in, free_in) = if was_fixed {
                        (curves[first].name(), curve.name())
                    } else {
                        (curve.name(), curves[first].name())
                    };
                    return Err(ConfigurationError::ConflictingFixedFlags {
                        name: name.clone(),
                        fixed_in: fixed_in.to_string(),
                        free_in: free_in.to_string(),
                    });
                }
            } else {
                seen.push((name.clone(), ci, param.fixed()));
            }

            if param.fixed() {
                curve_sources.push(ParamSource::Fixed(param.value()));
                continue;
            }

            let slot_idx = match slots.iter().position(|s| &s.name == name) {
                Some(idx) => {
                    let slot = &mut slots[idx];
                    let bounds = slot.bounds.intersect(param.bounds()).ok_or_else(|| {
                        ConfigurationError::ConflictingBounds {
                            name: name.clone(),
                            lower: slot.bounds.min,
                            upper: slot.bounds.max,
                            other_lower: param.min(),
                            other_upper: param.max(),
                        }
                    })?;
                    debug!(
                        "shared parameter '{}' also used by curve '{}', bounds [{}, {}]",
                        name,
                        curve.name(),
                        bounds.min,
                        bounds.max
                    );
                    slot.bounds = bounds;
                    slot.curves.push(ci);
                    idx
                }
                None => {
                    slots.push(FreeSlot {
                        name: name.clone(),
                        initial: param.value(),
                        bounds: *param.bounds(),
                        curves: vec![ci],
                    });
                    slots.len() - 1
                }
            };
            curve_sources.push(ParamSource::Free(slot_idx));
        }

        sources.push(curve_sources);
        names.push(formula_names);
    }

    for slot in &mut slots {
        if slot.is_shared() {
            let values: Vec<(String, f64)> = slot
                .curves
                .iter()
                .filter_map(|&ci| {
                    curves[ci]
                        .parameters()
                        .get(&slot.name)
                        .map(|p| (curves[ci].name().to_string(), p.value()))
                })
                .collect();
            if values.iter().any(|(_, v)| *v != slot.initial) {
                warn!(
                    "shared parameter '{}' starts from {} (first declaring curve); other curves disagree",
                    slot.name, slot.initial
                );
                notices.push(Notice::SharedValueMismatch {
                    name: slot.name.clone(),
                    used: slot.initial,
                    values,
                });
            }
        }
        slot.initial = slot.bounds.clamp(slot.initial);
    }

    debug!(
        "merged {} curve(s) into {} free slot(s)",
        curves.len(),
        slots.len()
    );

    Ok((
        MergedParameters {
            slots,
            sources,
            names,
        },
        notices,
    ))
}

impl MergedParameters {
    /// Number of free slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[FreeSlot] {
        &self.slots
    }

    /// Slot names, in vector order
    pub fn layout(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.name.clone()).collect()
    }

    /// Index of the free slot called `name`
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }

    /// Number of merged curves
    pub fn n_curves(&self) -> usize {
        self.sources.len()
    }

    /// Sources of curve `curve`'s formula parameters
    pub fn sources(&self, curve: usize) -> &[ParamSource] {
        &self.sources[curve]
    }

    /// Starting vector
    pub fn initial_vector(&self) -> Array1<f64> {
        self.slots.iter().map(|s| s.initial).collect()
    }

    pub fn bounds(&self) -> Vec<Bounds> {
        self.slots.iter().map(|s| s.bounds).collect()
    }

    pub fn lower(&self) -> Array1<f64> {
        self.slots.iter().map(|s| s.bounds.min).collect()
    }

    pub fn upper(&self) -> Array1<f64> {
        self.slots.iter().map(|s| s.bounds.max).collect()
    }

    /// Whether any slot has a finite lower or upper bound
    pub fn has_finite_bounds(&self) -> bool {
        self.slots.iter().any(|s| s.bounds.is_bounded())
    }

    /// Names of slots with a finite bound
    pub fn bounded_names(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|s| s.bounds.is_bounded())
            .map(|s| s.name.clone())
            .collect()
    }

    /// Formula parameter values of curve `curve` for the free vector `vector`
    pub fn curve_values(&self, curve: usize, vector: &[f64]) -> Vec<f64> {
        self.sources[curve]
            .iter()
            .map(|source| match source {
                ParamSource::Free(idx) => vector.get(*idx).copied().unwrap_or(f64::NAN),
                ParamSource::Fixed(value) => *value,
            })
            .collect()
    }

    /// Write slot values into every parameter they were merged from.
    ///
    /// `curves` must be the curves given to [`merge`], in the same order. Error
    /// estimates of the written parameters are cleared.
    pub fn apply(&self, vector: &[f64], curves: &mut [&mut Curve]) {
        for (ci, curve) in curves.iter_mut().enumerate().take(self.sources.len()) {
            for (name, source) in self.names[ci].iter().zip(&self.sources[ci]) {
                if let ParamSource::Free(idx) = source {
                    if let (Some(param), Some(value)) =
                        (curve.parameters_mut().get_mut(name), vector.get(*idx))
                    {
                        param.assign_fitted(*value);
                        param.clear_errors();
                    }
                }
            }
        }
    }

    /// Write per-slot error estimates into every parameter they were merged from.
    ///
    /// Fixed parameters of the merged curves have their errors cleared.
    pub fn apply_errors(
        &self,
        posteriori: &[Option<f64>],
        priori: &[Option<f64>],
        curves: &mut [&mut Curve],
    ) {
        for (ci, curve) in curves.iter_mut().enumerate().take(self.sources.len()) {
            for (name, source) in self.names[ci].iter().zip(&self.sources[ci]) {
                let Some(param) = curve.parameters_mut().get_mut(name) else {
                    continue;
                };
                match source {
                    ParamSource::Free(idx) => param.set_errors(
                        posteriori.get(*idx).copied().flatten(),
                        priori.get(*idx).copied().flatten(),
                    ),
                    ParamSource::Fixed(_) => param.clear_errors(),
                }
            }
        }
    }
}
