use super::{IntensityEstimator, PsychometricParams};

/// Grid resolution of the stimulator (one decimal).
const GRID_STEP_TENTHS: i32 = 1;

/// Bayesian threshold estimator in the QUEST+ style.
///
/// Keeps a posterior over candidate thresholds and proposes the stimulus that
/// minimizes the expected entropy of the posterior after the next response.
/// Stimulus and threshold domains share one grid over `[min, max)`.
pub struct QuestPlus {
    grid: Vec<f64>,
    posterior: Vec<f64>,
    params: PsychometricParams,
    start: f64,
    trials: usize,
}

impl QuestPlus {
    pub fn new(start: f64, bounds: (f64, f64), params: PsychometricParams) -> Self {
        let mut quest = Self {
            grid: Vec::new(),
            posterior: Vec::new(),
            params,
            start,
            trials: 0,
        };
        quest.reset(start, bounds, &params);
        quest
    }

    pub fn grid(&self) -> &[f64] {
        &self.grid
    }

    pub fn posterior(&self) -> &[f64] {
        &self.posterior
    }

    /// Posterior mean threshold.
    pub fn threshold_estimate(&self) -> Option<f64> {
        if self.grid.is_empty() {
            return None;
        }
        Some(
            self.grid
                .iter()
                .zip(&self.posterior)
                .map(|(t, p)| t * p)
                .sum(),
        )
    }

    /// Weibull on a linear stimulus scale.
    fn p_correct(&self, intensity: f64, threshold: f64) -> f64 {
        let PsychometricParams {
            slope,
            guess_rate,
            lapse_rate,
        } = self.params;
        let detect = if intensity <= 0.0 {
            0.0
        } else {
            1.0 - (-(intensity / threshold).powf(slope)).exp()
        };
        guess_rate + (1.0 - guess_rate - lapse_rate) * detect
    }

    fn expected_entropy(&self, intensity: f64) -> f64 {
        let likelihoods: Vec<f64> = self
            .grid
            .iter()
            .map(|&threshold| self.p_correct(intensity, threshold))
            .collect();

        let p_yes: f64 = self
            .posterior
            .iter()
            .zip(&likelihoods)
            .map(|(prior, l)| prior * l)
            .sum();
        let p_no = 1.0 - p_yes;

        let h_yes = entropy_of_update(&self.posterior, likelihoods.iter().copied());
        let h_no = entropy_of_update(&self.posterior, likelihoods.iter().map(|l| 1.0 - l));
        p_yes * h_yes + p_no * h_no
    }
}

/// Entropy of `prior * likelihood` after normalization.
fn entropy_of_update(prior: &[f64], likelihood: impl Iterator<Item = f64>) -> f64 {
    let unnormalized: Vec<f64> = prior.iter().zip(likelihood).map(|(p, l)| p * l).collect();
    let total: f64 = unnormalized.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    unnormalized
        .iter()
        .map(|u| u / total)
        .filter(|q| *q > 0.0)
        .map(|q| -q * q.ln())
        .sum()
}

impl IntensityEstimator for QuestPlus {
    fn reset(&mut self, start: f64, bounds: (f64, f64), params: &PsychometricParams) {
        let low = (bounds.0 * 10.0).round() as i32;
        let high = (bounds.1 * 10.0).round() as i32;
        self.grid = (low..high)
            .step_by(GRID_STEP_TENTHS as usize)
            .filter(|tenths| *tenths > 0)
            .map(|tenths| tenths as f64 / 10.0)
            .collect();

        let uniform = if self.grid.is_empty() {
            0.0
        } else {
            1.0 / self.grid.len() as f64
        };
        self.posterior = vec![uniform; self.grid.len()];
        self.params = *params;
        self.start = start;
        self.trials = 0;
    }

    fn next(&mut self) -> Option<f64> {
        if self.grid.is_empty() {
            return None;
        }
        if self.trials == 0 {
            return Some(self.start);
        }

        self.grid
            .iter()
            .map(|&intensity| (intensity, self.expected_entropy(intensity)))
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(intensity, _)| intensity)
    }

    fn add_response(&mut self, correct: bool, intensity: f64) {
        let updated: Vec<f64> = self
            .grid
            .iter()
            .zip(&self.posterior)
            .map(|(&threshold, prior)| {
                let p = self.p_correct(intensity, threshold);
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

#[cfg(test)]
mod tests {
    use super::*;

    fn quest() -> QuestPlus {
        QuestPlus::new(2.0, (1.0, 5.0), PsychometricParams::default())
    }

    #[test]
    fn grid_covers_half_open_bounds() {
        let quest = quest();
        assert_eq!(quest.grid().len(), 40);
        assert_eq!(quest.grid().first(), Some(&1.0));
        assert_eq!(quest.grid().last(), Some(&4.9));
        let total: f64 = quest.posterior().iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn first_proposal_is_the_start_value() {
        let mut quest = quest();
        assert_eq!(quest.next(), Some(2.0));
    }

    #[test]
    fn correct_responses_lower_the_threshold_estimate() {
        let mut quest = quest();
        let before = quest.threshold_estimate().unwrap();
        for _ in 0..15 {
            let next = quest.next().unwrap();
            quest.add_response(true, next);
        }
        assert!(quest.threshold_estimate().unwrap() < before);
        let total: f64 = quest.posterior().iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn misses_raise_the_threshold_estimate() {
        let mut quest = quest();
        let before = quest.threshold_estimate().unwrap();
        for _ in 0..15 {
            let next = quest.next().unwrap();
            quest.add_response(false, next);
        }
        assert!(quest.threshold_estimate().unwrap() > before);
    }

    #[test]
    fn proposals_stay_on_the_grid() {
        let mut quest = quest();
        for i in 0..20 {
            let next = quest.next().unwrap();
            assert!((1.0..5.0).contains(&next));
            assert!(((next * 10.0).round() - next * 10.0).abs() < 1e-9);
            quest.add_response(i % 3 != 0, next);
        }
    }

    #[test]
    fn empty_bounds_yield_no_proposal() {
        let mut quest = QuestPlus::new(2.0, (3.0, 3.0), PsychometricParams::default());
        assert_eq!(quest.next(), None);
    }

    #[test]
    fn reset_discards_history() {
        let mut quest = quest();
        quest.add_response(true, 2.0);
        quest.add_response(true, 1.5);
        quest.reset(2.5, (1.0, 5.0), &PsychometricParams::default());
        assert_eq!(quest.next(), Some(2.5));
        assert!(quest.posterior().iter().all(|p| (p - 1.0 / 40.0).abs() < 1e-12));
    }
}
