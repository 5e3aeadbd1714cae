//! Respiratory-rate based ISI calibration.
//!
//! A calibration block runs at the reference ISI while the operator counts breaths;
//! the reported rate then shifts the fast and slow ISIs away from the
//! reference. ISIs that sit on a multiple of the mains period are rejected so
//! the stimulus rhythm does not phase-lock with 50 Hz noise.

use crate::error::{ExperimentError, Result};

use std::collections::VecDeque;
use std::fmt;

pub const MAINS_FREQUENCY_HZ: f64 = 50.0;
const ALIAS_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsiSet {
    pub fast: f64,
    pub reference: f64,
    pub slow: f64,
}

impl IsiSet {
    pub fn derive(reference: f64, adjustment_factor: f64, rate: f64) -> Self {
        Self {
            fast: reference - adjustment_factor * rate,
            reference,
            slow: reference + adjustment_factor * rate,
        }
    }

    /// ISI for a block-order condition: 0 fast, 1 reference, 2 slow.
    pub fn for_condition(&self, condition: usize) -> Option<f64> {
        match condition {
            0 => Some(self.fast),
            1 => Some(self.reference),
            2 => Some(self.slow),
            _ => None,
        }
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.fast, self.reference, self.slow]
    }
}

impl fmt::Display for IsiSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fast {:.4} s, reference {:.4} s, slow {:.4} s",
            self.fast, self.reference, self.slow
        )
    }
}

pub fn is_mains_aliased(isi: f64) -> bool {
    let cycles = isi * MAINS_FREQUENCY_HZ;
    (cycles - cycles.round()).abs() < ALIAS_EPSILON
}

pub fn validate_isis(isis: &IsiSet) -> Result<()> {
    if let Some(&isi) = isis.as_array().iter().find(|isi| !isi.is_finite()) {
        return Err(ExperimentError::AliasedIsi {
            isi,
            reason: "not a finite interval",
        });
    }
    if let Some(&isi) = isis.as_array().iter().find(|isi| **isi < 0.0) {
        return Err(ExperimentError::AliasedIsi {
            isi,
            reason: "negative interval",
        });
    }
    if let Some(&isi) = isis.as_array().iter().find(|isi| is_mains_aliased(**isi)) {
        return Err(ExperimentError::AliasedIsi {
            isi,
            reason: "multiple of the 50 Hz mains period",
        });
    }
    Ok(())
}

pub fn parse_rate(input: &str) -> Result<f64> {
    let trimmed = input.trim();
    let rate: f64 = trimmed.parse().map_err(|_| ExperimentError::InvalidRateInput {
        input: trimmed.to_string(),
        reason: "not a number",
    })?;
    if !rate.is_finite() || rate <= 0.0 {
        return Err(ExperimentError::InvalidRateInput {
            input: trimmed.to_string(),
            reason: "must be a finite positive value",
        });
    }
    Ok(rate)
}

// RATE INPUT ------------------------------------------------------------------

/// Source of operator-reported respiratory rates. Called again after every
/// rejected value.
pub trait RateInput {
    fn read_rate(&mut self) -> Result<String>;
}

/// Pre-recorded answers, consumed in order.
pub struct ScriptedRates {
    answers: VecDeque<String>,
}

impl ScriptedRates {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
        }
    }
}

impl RateInput for ScriptedRates {
    fn read_rate(&mut self) -> Result<String> {
        self.answers
            .pop_front()
            .ok_or(ExperimentError::RateInputExhausted)
    }
}

// CALIBRATOR ------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationState {
    Measuring,
    AwaitingRate,
    Validating(f64),
    Accepted(IsiSet),
}

pub struct IsiCalibrator {
    reference: f64,
    adjustment_factor: f64,
    attempts: usize,
}

impl IsiCalibrator {
    pub fn new(reference: f64, adjustment_factor: f64) -> Self {
        Self {
            reference,
            adjustment_factor,
            attempts: 0,
        }
    }

    /// Number of calibration runs so far.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Drives the state machine to acceptance. `run_block` runs the calibration
    /// trials through the real-time loop; it is re-run after every rejected
    /// ISI set.
    pub fn calibrate<F>(&mut self, mut run_block: F, input: &mut dyn RateInput) -> Result<IsiSet>
    where
        F: FnMut() -> Result<()>,
    {
        let mut state = CalibrationState::Measuring;
        loop {
            state = match state {
                CalibrationState::Measuring => {
                    self.attempts += 1;
                    tracing::info!(attempt = self.attempts, "running calibration block");
                    run_block()?;
                    CalibrationState::AwaitingRate
                }
                CalibrationState::AwaitingRate => match parse_rate(&input.read_rate()?) {
                    Ok(rate) => CalibrationState::Validating(rate),
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!("{}", e);
                        CalibrationState::AwaitingRate
                    }
                    Err(e) => return Err(e),
                },
                CalibrationState::Validating(rate) => {
                    let isis = IsiSet::derive(self.reference, self.adjustment_factor, rate);
                    match validate_isis(&isis) {
                        Ok(()) => {
                            tracing::info!(rate, "accepted ISIs: {}", isis);
                            CalibrationState::Accepted(isis)
                        }
                        Err(e) => {
                            tracing::warn!(rate, "{}; repeating calibration", e);
                            CalibrationState::Measuring
                        }
                    }
                }
                CalibrationState::Accepted(isis) => return Ok(isis),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn derives_symmetric_isis() {
        let isis = IsiSet::derive(1.5, 0.1, 1.0);
        assert!(close(isis.fast, 1.4));
        assert!(close(isis.slow, 1.6));
        assert_eq!(isis.for_condition(1), Some(1.5));
        assert_eq!(isis.for_condition(3), None);
    }

    #[test]
    fn rejects_values_on_the_mains_period() {
        // 1.4, 1.5 and 1.6 s are all whole numbers of 20 ms cycles.
        let err = validate_isis(&IsiSet::derive(1.5, 0.1, 1.0)).unwrap_err();
        assert!(matches!(err, ExperimentError::AliasedIsi { .. }));
        assert!(is_mains_aliased(0.02));
        assert!(is_mains_aliased(1.0 + 1e-8));
        assert!(!is_mains_aliased(1.45 + 0.013));
    }

    #[test]
    fn rejects_negative_values() {
        let err = validate_isis(&IsiSet::derive(0.5, 0.1, 7.3)).unwrap_err();
        assert!(matches!(err, ExperimentError::AliasedIsi { isi, .. } if isi < 0.0));
    }

    #[test]
    fn rejects_non_finite_values() {
        let err = validate_isis(&IsiSet::derive(1.45, f64::NAN, 1.0)).unwrap_err();
        assert!(matches!(err, ExperimentError::AliasedIsi { isi, .. } if isi.is_nan()));
        assert!(validate_isis(&IsiSet::derive(f64::INFINITY, 0.1, 1.0)).is_err());
    }

    #[test]
    fn nan_factor_never_installs_isis() {
        let mut calibrator = IsiCalibrator::new(1.45, f64::NAN);
        let mut runs = 0;
        let mut input = ScriptedRates::new(["1.0"]);
        let err = calibrator
            .calibrate(
                || {
                    runs += 1;
                    Ok(())
                },
                &mut input,
            )
            .unwrap_err();

        assert!(matches!(err, ExperimentError::RateInputExhausted));
        assert_eq!(runs, 2);
    }

    #[test]
    fn accepts_clean_values() {
        assert!(validate_isis(&IsiSet::derive(1.45, 0.1, 0.13)).is_ok());
    }

    #[test]
    fn rate_parsing() {
        assert_eq!(parse_rate(" 0.25\n").unwrap(), 0.25);
        for bad in ["abc", "", "0", "-1", "inf", "NaN"] {
            let err = parse_rate(bad).unwrap_err();
            assert!(err.is_recoverable(), "{bad:?} should be re-prompted");
        }
    }

    #[test]
    fn reprompts_invalid_input_without_rerunning() {
        let mut calibrator = IsiCalibrator::new(1.45, 0.1);
        let mut runs = 0;
        let mut input = ScriptedRates::new(["twelve", "-3", "0.13"]);

        let isis = calibrator
            .calibrate(
                || {
                    runs += 1;
                    Ok(())
                },
                &mut input,
            )
            .unwrap();

        assert_eq!(runs, 1);
        assert!(close(isis.fast, 1.437));
        assert!(close(isis.slow, 1.463));
    }

    #[test]
    fn aliased_result_reruns_the_calibration_block() {
        let mut calibrator = IsiCalibrator::new(1.45, 0.1);
        let mut runs = 0;
        // 1.45 -+ 0.1 * 0.5 = 1.40 / 1.50: aliased. 0.13 is clean.
        let mut input = ScriptedRates::new(["0.5", "0.13"]);

        let isis = calibrator
            .calibrate(
                || {
                    runs += 1;
                    Ok(())
                },
                &mut input,
            )
            .unwrap();

        assert_eq!(runs, 2);
        assert_eq!(calibrator.attempts(), 2);
        assert!(close(isis.reference, 1.45));
    }

    #[test]
    fn exhausted_script_is_fatal() {
        let mut calibrator = IsiCalibrator::new(1.5, 0.1);
        let mut input = ScriptedRates::new(["1.0"]);
        let err = calibrator.calibrate(|| Ok(()), &mut input).unwrap_err();
        assert!(matches!(err, ExperimentError::RateInputExhausted));
    }
}
