//! Real-time trial loop.
//!
//! One iteration per trial: fire the stimulus, log it, pre-stage the
//! generator for the next trial, then spin until the trial's deadline while
//! polling the response register. All state changes happen on this thread;
//! the key capture thread only touches the listener's slot.

use super::delivery::{IntensityMap, StimulusDelivery};
use super::responses::ResponseListener;
use super::staircase::AdaptiveProcedure;
use super::trial::{Correctness, EventRecord, EventType, Trial};
use crate::error::{ExperimentError, Result};
use crate::hardware::{Intensity, TriggerLine};
use crate::utils::clock::{spin_until, Clock};
use crate::utils::log::{echo_event, EventSink};

use std::collections::HashMap;
use std::time::Duration;

// SETTINGS --------------------------------------------------------------------

/// Trigger code per event tag (`stim/salient`, `target/<tag>`,
/// `response/<tag>/correct`, `response/<tag>/incorrect`).
#[derive(Debug, Clone)]
pub struct TriggerCodes {
    codes: HashMap<String, u16>,
}

impl TriggerCodes {
    /// Fails unless every tag the given targets can produce has a code.
    pub fn new(codes: HashMap<String, u16>, targets: &[String]) -> Result<Self> {
        let mut required = vec![EventType::Salient.to_string()];
        for tag in targets {
            required.push(EventType::target(tag.as_str()).to_string());
            required.push(response_key(tag, true));
            required.push(response_key(tag, false));
        }
        let missing: Vec<String> = required
            .into_iter()
            .filter(|key| !codes.contains_key(key))
            .collect();
        if !missing.is_empty() {
            return Err(ExperimentError::Config(format!(
                "missing trigger codes for {:?}",
                missing
            )));
        }
        Ok(Self { codes })
    }

    pub fn stimulus(&self, event: &EventType) -> Result<u16> {
        self.lookup(&event.to_string())
    }

    pub fn response(&self, tag: &str, correct: bool) -> Result<u16> {
        self.lookup(&response_key(tag, correct))
    }

    fn lookup(&self, key: &str) -> Result<u16> {
        self.codes
            .get(key)
            .copied()
            .ok_or_else(|| ExperimentError::Config(format!("no trigger code for {:?}", key)))
    }
}

fn response_key(tag: &str, correct: bool) -> String {
    format!(
        "response/{}/{}",
        tag,
        if correct { "correct" } else { "incorrect" }
    )
}

/// Keys counted as a correct answer for each target tag.
#[derive(Debug, Clone)]
pub struct ResponseKeys {
    keys: HashMap<String, Vec<char>>,
}

impl ResponseKeys {
    pub fn new(keys: HashMap<String, Vec<char>>) -> Self {
        Self { keys }
    }

    pub fn is_correct(&self, tag: &str, key: char) -> bool {
        self.keys.get(tag).map_or(false, |keys| keys.contains(&key))
    }

    pub fn all_keys(&self) -> Vec<char> {
        let mut all: Vec<char> = self.keys.values().flatten().copied().collect();
        all.sort_unstable();
        all.dedup();
        all
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub triggers: TriggerCodes,
    pub keys: ResponseKeys,
    /// Target tag that delivers no stimulus, if any.
    pub omission_tag: Option<String>,
    pub trigger_duration: Duration,
    /// Only honour a trial's reset flag once a response was captured.
    pub reset_requires_response: bool,
    pub echo_events: bool,
}

// SCHEDULER -------------------------------------------------------------------

pub struct Scheduler {
    clock: Box<dyn Clock>,
    delivery: Box<dyn StimulusDelivery>,
    procedure: AdaptiveProcedure,
    listener: ResponseListener,
    trigger: Box<dyn TriggerLine>,
    sink: Box<dyn EventSink>,
    settings: SchedulerSettings,
    intensities: IntensityMap,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Box<dyn Clock>,
        delivery: Box<dyn StimulusDelivery>,
        procedure: AdaptiveProcedure,
        listener: ResponseListener,
        trigger: Box<dyn TriggerLine>,
        sink: Box<dyn EventSink>,
        settings: SchedulerSettings,
        intensities: IntensityMap,
    ) -> Self {
        Self {
            clock,
            delivery,
            procedure,
            listener,
            trigger,
            sink,
            settings,
            intensities,
        }
    }

    pub fn intensities(&self) -> IntensityMap {
        self.intensities
    }

    pub fn procedure_mut(&mut self) -> &mut AdaptiveProcedure {
        &mut self.procedure
    }

    /// Re-seeds the staircase and adopts its first proposal.
    pub fn reset_procedure(&mut self) -> Result<()> {
        self.intensities.weak = self.procedure.reset()?;
        tracing::info!(weak = %self.intensities.weak, "staircase has been reset");
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()
    }

    /// Runs every trial in order. Trials that received a response come back
    /// with their event type rewritten to `response`.
    pub fn run_trials(&mut self, trials: &mut [Trial]) -> Result<()> {
        for i in 0..trials.len() {
            let next = trials.get(i + 1).map(|t| t.event_type.clone());
            self.run_trial(&mut trials[i], next.as_ref())?;
        }
        Ok(())
    }

    fn resolve_intensity(&self, event: &EventType) -> Intensity {
        match event {
            EventType::Salient => self.intensities.salient,
            EventType::Target(tag)
                if self.settings.omission_tag.as_deref() == Some(tag.as_str()) =>
            {
                Intensity::ZERO
            }
            _ => self.intensities.weak,
        }
    }

    fn run_trial(&mut self, trial: &mut Trial, next: Option<&EventType>) -> Result<()> {
        let window = Duration::try_from_secs_f64(trial.isi).map_err(|_| {
            ExperimentError::Config(format!("trial ISI {} is not a usable interval", trial.isi))
        })?;
        let intensity = self.resolve_intensity(&trial.event_type);
        let trigger = self.settings.triggers.stimulus(&trial.event_type)?;

        self.delivery.deliver_stimulus(&trial.event_type)?;
        let event_time = self.clock.elapsed();
        self.log(EventRecord::for_trial(
            trial,
            event_time.as_secs_f64(),
            intensity,
            trigger,
            Correctness::Unset,
        ))?;

        self.listener.set_active(trial.event_type.is_target());
        let deadline = event_time + window;

        self.delivery
            .prepare_next(&trial.event_type, next, &self.intensities)?;

        let mut response_given = false;
        while self.clock.elapsed() < deadline {
            if response_given || !self.listener.is_active() {
                std::hint::spin_loop();
                continue;
            }
            if let Some(key) = self.listener.take_response() {
                response_given = true;
                self.handle_response(trial, key, intensity)?;
            }
        }

        if trial.reset_procedure && !response_given {
            if self.settings.reset_requires_response {
                tracing::warn!(
                    block = %trial.block,
                    n_in_block = trial.n_in_block,
                    "no response on reset trial; staircase not reset"
                );
            } else {
                self.reset_procedure()?;
            }
        }

        self.listener.set_active(false);
        Ok(())
    }

    fn handle_response(
        &mut self,
        trial: &mut Trial,
        key: char,
        intensity: Intensity,
    ) -> Result<()> {
        let Some(tag) = trial.event_type.target_tag().map(str::to_string) else {
            return Ok(());
        };
        let correct = self.settings.keys.is_correct(&tag, key);
        let response_trigger = self.settings.triggers.response(&tag, correct)?;
        tracing::debug!(key = %key, correct, "response");

        self.pulse_trigger(response_trigger)?;
        trial.event_type = EventType::Response;
        self.log(EventRecord::for_trial(
            trial,
            self.clock.elapsed().as_secs_f64(),
            intensity,
            response_trigger,
            correct.into(),
        ))?;

        if !intensity.is_zero() {
            self.procedure.record_outcome(correct, intensity);
            self.intensities.weak = self.procedure.propose_next()?;
        }

        if trial.reset_procedure {
            self.reset_procedure()?;
        }
        Ok(())
    }

    fn pulse_trigger(&mut self, code: u16) -> Result<()> {
        self.trigger.raise(code)?;
        let until = self.clock.elapsed() + self.settings.trigger_duration;
        spin_until(self.clock.as_ref(), until);
        self.trigger.lower()?;
        Ok(())
    }

    fn log(&mut self, record: EventRecord) -> Result<()> {
        if self.settings.echo_events {
            echo_event(&record);
        }
        self.sink.record(&record)
    }
}
