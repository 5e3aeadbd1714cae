pub mod quest;
pub mod quest_plus;

pub use quest::Quest;
pub use quest_plus::QuestPlus;

use crate::error::{ExperimentError, Result};
use crate::hardware::Intensity;

use serde::{Deserialize, Serialize};

/// Shape of the psychometric function assumed by the estimator.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct PsychometricParams {
    pub slope: f64,
    /// Lower asymptote (0.5 for a two-alternative task).
    pub guess_rate: f64,
    pub lapse_rate: f64,
}

impl Default for PsychometricParams {
    fn default() -> Self {
        Self {
            slope: 2.0,
            guess_rate: 0.5,
            lapse_rate: 0.05,
        }
    }
}

/// External next-intensity estimator.
pub trait IntensityEstimator {
    /// Discard history and re-seed.
    fn reset(&mut self, start: f64, bounds: (f64, f64), params: &PsychometricParams);
    /// Best next intensity, or `None` if the estimator has nothing to offer.
    fn next(&mut self) -> Option<f64>;
    fn add_response(&mut self, correct: bool, intensity: f64);
}

/// The scheduler's view of the staircase.
pub struct AdaptiveProcedure {
    estimator: Box<dyn IntensityEstimator>,
    start: f64,
    bounds: (f64, f64),
    params: PsychometricParams,
    outcomes: usize,
}

impl AdaptiveProcedure {
    /// `start`, `bounds` and `params` are the seed reused by [`Self::reset`].
    pub fn new(
        estimator: Box<dyn IntensityEstimator>,
        start: f64,
        bounds: (f64, f64),
        params: PsychometricParams,
    ) -> Self {
        Self {
            estimator,
            start,
            bounds,
            params,
            outcomes: 0,
        }
    }

    /// Re-seeds with the configured values and returns the first proposal.
    pub fn reset(&mut self) -> Result<Intensity> {
        let (start, bounds, params) = (self.start, self.bounds, self.params);
        self.reset_with(start, bounds, params)
    }

    pub fn reset_with(
        &mut self,
        start: f64,
        bounds: (f64, f64),
        params: PsychometricParams,
    ) -> Result<Intensity> {
        self.estimator.reset(start, bounds, &params);
        self.outcomes = 0;
        tracing::info!(start, min = bounds.0, max = bounds.1, "staircase reset");
        self.propose_next()
    }

    pub fn propose_next(&mut self) -> Result<Intensity> {
        match self.estimator.next() {
            Some(value) if value.is_finite() => Ok(Intensity::from_f64(value)),
            Some(value) => Err(ExperimentError::EstimatorUnavailable {
                reason: format!("estimator proposed {}", value),
            }),
            None => Err(ExperimentError::EstimatorUnavailable {
                reason: "estimator returned no proposal".to_string(),
            }),
        }
    }

    /// Omissions carry no intensity and are never fed to the estimator.
    pub fn record_outcome(&mut self, correct: bool, intensity: Intensity) {
        if intensity.is_zero() {
            tracing::warn!("ignoring outcome for a zero-intensity trial");
            return;
        }
        self.estimator.add_response(correct, intensity.as_f64());
        self.outcomes += 1;
    }

    /// Outcomes recorded since the last reset.
    pub fn outcomes(&self) -> usize {
        self.outcomes
    }
}
