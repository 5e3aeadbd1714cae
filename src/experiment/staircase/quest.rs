use super::{IntensityEstimator, PsychometricParams};

/// Resolution of the threshold grid in log10 units.
const GRAIN: f64 = 0.01;
/// Threshold grid reaches this far past the stimulus bounds, in log10 units.
const MARGIN: f64 = 1.0;
/// Smallest stimulus the stimulator can express.
const MIN_STIMULUS: f64 = 0.1;

/// Classic QUEST (Watson and Pelli) threshold tracker.
///
/// The posterior over log10 thresholds starts as a Gaussian around the start
/// value. Each proposal is the posterior median, converted back to a linear
/// intensity, snapped to one decimal and clipped to `[min, max)`. The Weibull
/// is placed so that `target` is the probability correct at threshold.
pub struct Quest {
    target: f64,
    start_sd: f64,
    params: PsychometricParams,
    offset: f64,
    start: f64,
    bounds: (f64, f64),
    grid: Vec<f64>,
    posterior: Vec<f64>,
    trials: usize,
}

impl Quest {
    pub fn new(
        start: f64,
        bounds: (f64, f64),
        params: PsychometricParams,
        target: f64,
        start_sd: f64,
    ) -> Self {
        let mut quest = Self {
            target,
            start_sd,
            params,
            offset: 0.0,
            start,
            bounds,
            grid: Vec::new(),
            posterior: Vec::new(),
            trials: 0,
        };
        quest.reset(start, bounds, &params);
        quest
    }

    /// Shift in log10 units that puts `target` at threshold, or `None` when
    /// `target` is out of reach of the guess and lapse rates.
    pub fn threshold_offset(target: f64, params: &PsychometricParams) -> Option<f64> {
        let PsychometricParams {
            slope,
            guess_rate,
            lapse_rate,
        } = *params;
        if !(slope > 0.0 && lapse_rate < 1.0 && guess_rate < 1.0) {
            return None;
        }
        let detect = (target - lapse_rate * guess_rate) / (1.0 - lapse_rate);
        let miss = (1.0 - detect) / (1.0 - guess_rate);
        if !(miss > 0.0 && miss < 1.0) {
            return None;
        }
        let offset = (-miss.ln()).log10() / slope;
        offset.is_finite().then_some(offset)
    }

    /// Posterior median threshold on the linear scale.
    pub fn threshold_estimate(&self) -> Option<f64> {
        self.median().map(|log| 10f64.powf(log))
    }

    fn median(&self) -> Option<f64> {
        let total: f64 = self.posterior.iter().sum();
        if !(total > 0.0) {
            return None;
        }
        let mut cumulative = 0.0;
        for (t, p) in self.grid.iter().zip(&self.posterior) {
            cumulative += p;
            if cumulative >= total / 2.0 {
                return Some(*t);
            }
        }
        self.grid.last().copied()
    }

    fn p_correct(&self, log_intensity: f64, log_threshold: f64) -> f64 {
        let PsychometricParams {
            slope,
            guess_rate,
            lapse_rate,
        } = self.params;
        let u = 10f64.powf(slope * (log_intensity - log_threshold + self.offset));
        lapse_rate * guess_rate + (1.0 - lapse_rate) * (1.0 - (1.0 - guess_rate) * (-u).exp())
    }

    fn clip(&self, value: f64) -> f64 {
        let low = self.bounds.0.max(MIN_STIMULUS);
        let high = self.bounds.1 - MIN_STIMULUS;
        ((value * 10.0).round() / 10.0).clamp(low, high.max(low))
    }
}

impl IntensityEstimator for Quest {
    fn reset(&mut self, start: f64, bounds: (f64, f64), params: &PsychometricParams) {
        self.params = *params;
        self.start = start;
        self.bounds = bounds;
        self.trials = 0;
        self.grid.clear();
        self.posterior.clear();

        let Some(offset) = Self::threshold_offset(self.target, params) else {
            tracing::warn!(p_threshold = self.target, "QUEST target unreachable; no proposals");
            return;
        };
        self.offset = offset;
        let low = bounds.0.max(MIN_STIMULUS);
        if !(bounds.1 > low && start > 0.0 && self.start_sd > 0.0) {
            return;
        }

        let from = low.log10() - MARGIN;
        let to = bounds.1.log10() + MARGIN;
        let steps = ((to - from) / GRAIN).round() as usize;
        let mean = start.log10();
        self.grid = (0..=steps).map(|i| from + i as f64 * GRAIN).collect();
        self.posterior = self
            .grid
            .iter()
            .map(|t| (-0.5 * ((t - mean) / self.start_sd).powi(2)).exp())
            .collect();
    }

    fn next(&mut self) -> Option<f64> {
        if self.grid.is_empty() {
            return None;
        }
        if self.trials == 0 {
            return Some(self.start);
        }
        self.median().map(|log| self.clip(10f64.powf(log)))
    }

    fn add_response(&mut self, correct: bool, intensity: f64) {
        if intensity <= 0.0 {
            return;
        }
        let x = intensity.log10();
        let updated: Vec<f64> = self
            .grid
            .iter()
            .zip(&self.posterior)
            .map(|(&t, prior)| {
                let p = self.p_correct(x, t);
                prior * if correct { p } else { 1.0 - p }
            })
            .collect();

        let total: f64 = updated.iter().sum();
        if total > 0.0 {
            self.posterior = updated.into_iter().map(|u| u / total).collect();
        }
        self.trials += 1;
    }
}
