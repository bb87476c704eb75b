//! Hill-climbing random search.
//!
//! Each cycle draws `trials` candidates around the best vector. Every free
//! parameter is offset by `u · amplitude · scale` with `u` uniform in
//! `[-1, 1)` and `scale = |x_i|` (or 1 for a zero value). A candidate replaces
//! the best vector only when it strictly lowers the objective. The amplitude
//! is multiplied by `escalate` after every cycle.

use log::{debug, info};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::error::{GlobFitError, Result};
use crate::problem::Problem;
use crate::spec::GlobalFitSpec;

use super::{finite_bounds, spec_residuals, write_back};
use super::{CancelToken, Interrupt, Objective, SearchOutcome, SearchTermination};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomSearchConfig {
    /// Number of cycles
    pub cycles: usize,

    /// Candidates drawn per cycle
    pub trials: usize,

    /// Initial relative perturbation
    pub amplitude: f64,

    /// Factor applied to the amplitude after each cycle
    pub escalate: f64,

    /// Objective evaluations allowed; `None` means one per candidate plus the start
    pub max_evaluations: Option<usize>,

    /// Seed for reproducible searches; `None` seeds from the operating system
    pub seed: Option<u64>,
}

impl Default for RandomSearchConfig {
    fn default() -> Self {
        Self {
            cycles: 100,
            trials: 10,
            amplitude: 0.1,
            escalate: 1.0,
            max_evaluations: None,
            seed: None,
        }
    }
}

impl RandomSearchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_cycles(mut self, cycles: usize) -> Self {
        self.cycles = cycles;
        self
    }

    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = trials;
        self
    }

    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }

    pub fn with_escalate(mut self, escalate: f64) -> Self {
        self.escalate = escalate;
        self
    }

    pub fn with_max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.max_evaluations = Some(max_evaluations);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct RandomSearch {
    config: RandomSearchConfig,
}

impl RandomSearch {
    pub fn new(config: RandomSearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RandomSearchConfig {
        &self.config
    }

    /// Search around the current parameters of `spec` and write back the best
    /// vector if it improves on the start. Written-back parameters lose their
    /// error estimates.
    pub fn run(&self, spec: &mut GlobalFitSpec<'_>, cancel: &CancelToken) -> Result<SearchOutcome> {
        let (residuals, merge_notices) = spec_residuals(spec)?;
        let initial = residuals.initial_vector();
        let merged = residuals.merged();
        let (lower, upper) = (merged.lower(), merged.upper());

        info!(
            "random search over {} free parameter(s): {} cycle(s) of {} trial(s)",
            residuals.n_beta(),
            self.config.cycles,
            self.config.trials
        );
        let mut outcome = self.search(&residuals, initial, Some((&lower, &upper)), cancel)?;
        outcome.notices = merge_notices;
        write_back(spec, &residuals, &mut outcome, "random search");
        Ok(outcome)
    }

    /// Search around `initial`, keeping every candidate inside `bounds`.
    pub fn search<P: Problem + ?Sized>(
        &self,
        problem: &P,
        initial: Array1<f64>,
        bounds: Option<(&Array1<f64>, &Array1<f64>)>,
        cancel: &CancelToken,
    ) -> Result<SearchOutcome> {
        let n = initial.len();
        if n == 0 {
            return Err(GlobFitError::InvalidInput(
                "nothing to search: no parameters".to_string(),
            ));
        }
        if !self.config.amplitude.is_finite() || !self.config.escalate.is_finite() {
            return Err(GlobFitError::InvalidInput(format!(
                "amplitude {} and escalate {} must be finite",
                self.config.amplitude, self.config.escalate
            )));
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

        let max_evaluations = self
            .config
            .max_evaluations
            .unwrap_or(self.config.cycles * self.config.trials + 1);
        let mut obj = Objective::new(problem, cancel, finite_bounds(bounds), max_evaluations);
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut cycles = 0;
        let status = self.climb(&mut obj, &initial, &mut rng, &mut cycles);
        obj.finish(initial, cycles, status, Vec::new())
    }

    fn climb<P: Problem + ?Sized>(
        &self,
        obj: &mut Objective<'_, P>,
        initial: &Array1<f64>,
        rng: &mut StdRng,
        cycles: &mut usize,
    ) -> std::result::Result<SearchTermination, Interrupt> {
        let unit = Uniform::new(-1.0, 1.0);
        let mut best = obj.project(initial);
        let mut f_best = obj.eval(&best)?;
        let mut amplitude = self.config.amplitude;

        while *cycles < self.config.cycles {
            for _ in 0..self.config.trials {
                let candidate = Array1::from_shape_fn(best.len(), |i| {
                    let scale = if best[i] != 0.0 { best[i].abs() } else { 1.0 };
                    best[i] + unit.sample(&mut *rng) * amplitude * scale
                });
                let candidate = obj.project(&candidate);
                let f = obj.eval(&candidate)?;
                if f < f_best {
                    best = candidate;
                    f_best = f;
                }
            }
            *cycles += 1;
            amplitude *= self.config.escalate;
            debug!("random search cycle {}: best cost {:.6e}", cycles, f_best);
        }
        Ok(SearchTermination::CyclesCompleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    struct Valley;

    impl Problem for Valley {
        fn eval(&self, p: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(array![p[0] - 3.0, p[1] + 1.0])
        }

        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            2
        }
    }

    /// Flat everywhere except a step down at p >= 5.
    struct Ledge;

    impl Problem for Ledge {
        fn eval(&self, p: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(array![if p[0] >= 5.0 { 0.0 } else { 1.0 }])
        }

        fn parameter_count(&self) -> usize {
            1
        }

        fn residual_count(&self) -> usize {
            1
        }
    }

    #[test]
    fn test_escalate_widens_the_reach() {
        // offsets stay within 0.01 * |x| without escalation, so the ledge at
        // 5 is out of reach from 1
        let base = RandomSearchConfig::new()
            .with_amplitude(0.01)
            .with_cycles(12)
            .with_seed(17);

        let fixed = RandomSearch::new(base.clone().with_escalate(1.0))
            .search(&Ledge, array![1.0], None, &CancelToken::new())
            .unwrap();
        assert!(!fixed.improved());
        assert_eq!(fixed.params, array![1.0]);

        let widening = RandomSearch::new(base.with_escalate(3.0))
            .search(&Ledge, array![1.0], None, &CancelToken::new())
            .unwrap();
        assert!(widening.improved());
        assert_eq!(widening.cost, 0.0);
        assert!(widening.params[0] >= 5.0);
    }

    #[test]
    fn test_never_worsens() {
        let search = RandomSearch::new(RandomSearchConfig::new().with_cycles(20).with_seed(7));
        let outcome = search
            .search(&Valley, array![1.0, 1.0], None, &CancelToken::new())
            .unwrap();

        assert_eq!(outcome.termination, SearchTermination::CyclesCompleted);
        assert_eq!(outcome.iterations, 20);
        assert_eq!(outcome.evaluations, 201);
        assert!(outcome.cost <= outcome.initial_cost);
        assert!(outcome.improved());
    }

    #[test]
    fn test_zero_amplitude_is_a_no_op() {
        let config = RandomSearchConfig::new()
            .with_amplitude(0.0)
            .with_escalate(1.0)
            .with_cycles(5)
            .with_seed(1);
        let outcome = RandomSearch::new(config)
            .search(&Valley, array![1.0, 1.0], None, &CancelToken::new())
            .unwrap();

        assert_eq!(outcome.params, array![1.0, 1.0]);
        assert_eq!(outcome.cost, outcome.initial_cost);
        assert!(!outcome.improved());
    }

    #[test]
    fn test_same_seed_same_result() {
        let config = RandomSearchConfig::new().with_cycles(10).with_seed(42);
        let a = RandomSearch::new(config.clone())
            .search(&Valley, array![0.0, 0.0], None, &CancelToken::new())
            .unwrap();
        let b = RandomSearch::new(config)
            .search(&Valley, array![0.0, 0.0], None, &CancelToken::new())
            .unwrap();
        assert_eq!(a.params, b.params);
        assert_eq!(a.cost, b.cost);
    }

    #[test]
    fn test_candidates_are_clipped() {
        let config = RandomSearchConfig::new()
            .with_amplitude(5.0)
            .with_cycles(10)
            .with_seed(3);
        let lower = array![0.0, 0.0];
        let upper = array![2.0, 2.0];
        let outcome = RandomSearch::new(config)
            .search(&Valley, array![1.0, 1.0], Some((&lower, &upper)), &CancelToken::new())
            .unwrap();

        assert!(outcome.params.iter().all(|&v| (0.0..=2.0).contains(&v)));
        assert!(outcome.cost < outcome.initial_cost);
    }

    #[test]
    fn test_budget_limits_evaluations() {
        let config = RandomSearchConfig::new().with_max_evaluations(15).with_seed(5);
        let outcome = RandomSearch::new(config)
            .search(&Valley, array![1.0, 1.0], None, &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.termination, SearchTermination::MaxEvaluations);
        assert_eq!(outcome.evaluations, 15);
        assert_eq!(outcome.iterations, 1);
    }

    #[test]
    fn test_config_from_json() {
        let config = RandomSearchConfig::from_json(r#"{"cycles": 3, "seed": 9}"#).unwrap();
        assert_eq!(config.cycles, 3);
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.trials, 10);
        assert_eq!(config.amplitude, 0.1);
    }
}
