//! The set of dataset/curve pairs one fit or search operates on.

use crate::curve::Curve;
use crate::dataset::DataSet;
use crate::error::ConfigurationError;
use crate::fit::Notice;
use crate::registry::{self, MergedParameters};

/// One dataset and the curve fitted to it
///
/// The dataset is only read. The curve is borrowed mutably so that fitted values
/// and errors can be written back once the operation completes.
#[derive(Debug)]
pub struct FitPair<'a> {
    pub dataset: &'a DataSet,
    pub curve: &'a mut Curve,
    pub active: bool,
}

/// The dataset/curve pairs of a global fit, in declaration order
///
/// Built fresh for each invocation; nothing outlives the borrows it holds.
#[derive(Debug, Default)]
pub struct GlobalFitSpec<'a> {
    pairs: Vec<FitPair<'a>>,
}

impl<'a> GlobalFitSpec<'a> {
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Add an active pair
    pub fn with_pair(mut self, dataset: &'a DataSet, curve: &'a mut Curve) -> Self {
        self.add_pair(dataset, curve, true);
        self
    }

    /// Add a pair that is carried along but does not take part
    pub fn with_inactive_pair(mut self, dataset: &'a DataSet, curve: &'a mut Curve) -> Self {
        self.add_pair(dataset, curve, false);
        self
    }

    pub fn add_pair(&mut self, dataset: &'a DataSet, curve: &'a mut Curve, active: bool) {
        self.pairs.push(FitPair {
            dataset,
            curve,
            active,
        });
    }

    pub fn pairs(&self) -> &[FitPair<'a>] {
        &self.pairs
    }

    pub fn pairs_mut(&mut self) -> &mut [FitPair<'a>] {
        &mut self.pairs
    }

    pub fn set_active(&mut self, idx: usize, active: bool) {
        if let Some(pair) = self.pairs.get_mut(idx) {
            pair.active = active;
        }
    }

    pub fn active_pairs(&self) -> impl Iterator<Item = &FitPair<'a>> {
        self.pairs.iter().filter(|p| p.active)
    }

    pub fn n_active_pairs(&self) -> usize {
        self.active_pairs().count()
    }

    /// Curves of the active pairs, in declaration order
    pub fn active_curves(&self) -> Vec<&Curve> {
        self.active_pairs().map(|p| &*p.curve).collect()
    }

    /// Mutable curves of the active pairs, in declaration order
    pub fn active_curves_mut(&mut self) -> Vec<&mut Curve> {
        self.pairs
            .iter_mut()
            .filter(|p| p.active)
            .map(|p| &mut *p.curve)
            .collect()
    }

    /// Whether any active dataset carries x-errors
    pub fn has_x_errors(&self) -> bool {
        self.active_pairs().any(|p| p.dataset.has_x_errors())
    }

    /// Whether every active dataset carries y-errors
    pub fn has_y_errors(&self) -> bool {
        self.n_active_pairs() > 0 && self.active_pairs().all(|p| p.dataset.has_y_errors())
    }

    /// Data points the active pairs contribute
    pub fn n_active_points(&self) -> usize {
        self.active_pairs().map(|p| p.dataset.n_active()).sum()
    }

    /// Merge the parameters of the active curves into one free vector layout.
    pub fn merge(&self) -> Result<(MergedParameters, Vec<Notice>), ConfigurationError> {
        if self.n_active_pairs() == 0 {
            return Err(ConfigurationError::NoActivePairs);
        }
        registry::merge(&self.active_curves())
    }
}
