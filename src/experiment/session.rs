//! Wires a configuration into a runnable session: hardware, staircase,
//! scheduler, calibration and the block plan.

use super::calibration::{IsiCalibrator, IsiSet, RateInput};
use super::delivery::{DetectionDelivery, IntensityMap, LateralisedDelivery, StimulusDelivery};
use super::responses::ResponseListener;
use super::scheduler::{ResponseKeys, Scheduler, SchedulerSettings, TriggerCodes};
use super::sequence::{self, generate_block, generate_calibration_block, plan_blocks, TargetChoice};
use super::staircase::{AdaptiveProcedure, IntensityEstimator, Quest, QuestPlus};
use super::trial::Trial;
use crate::config::{Config, StaircaseMethod, Variant};
use crate::error::{ExperimentError, Result};
use crate::hardware::{
    FakeTransport, Intensity, IntensityCodeTable, NullTrigger, SerialTransport, Stimulator,
    Transport, TriggerLine,
};
use crate::utils::clock::{Clock, MonotonicClock};
use crate::utils::log::{session_log_path, CsvEventLog, EventSink};

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Collaborators a session runs against.
pub struct SessionParts {
    pub clock: Box<dyn Clock>,
    pub delivery: Box<dyn StimulusDelivery>,
    pub listener: ResponseListener,
    pub trigger: Box<dyn TriggerLine>,
    pub sink: Box<dyn EventSink>,
    pub rate_input: Box<dyn RateInput>,
}

pub struct Session {
    config: Config,
    scheduler: Scheduler,
    targets: TargetChoice,
    rng: StdRng,
    rate_input: Box<dyn RateInput>,
}

impl Session {
    /// Opens the configured hardware and a fresh event log.
    pub fn open(
        config: Config,
        listener: ResponseListener,
        rate_input: Box<dyn RateInput>,
    ) -> Result<Self> {
        config.validate()?;
        let mut delivery = build_delivery(&config)?;
        prepare_hardware(&config, delivery.as_mut())?;

        let log_path = session_log_path(&config.logging.output, config.logging.timestamped);
        let sink = CsvEventLog::create(&log_path)?;

        Self::assemble(
            config,
            SessionParts {
                clock: Box::new(MonotonicClock::start()),
                delivery,
                listener,
                trigger: Box::new(NullTrigger::new()),
                sink: Box::new(sink),
                rate_input,
            },
        )
    }

    /// Builds the staircase and scheduler around already-prepared parts.
    pub fn assemble(config: Config, parts: SessionParts) -> Result<Self> {
        let exp = &config.experiment;
        let targets = TargetChoice::new(exp.targets.clone(), exp.target_proportions)?;

        let bounds = (config.staircase.min_intensity, config.staircase_max());
        let params = config.staircase.psychometric;
        let start = config.intensities.weak;
        let estimator: Box<dyn IntensityEstimator> = match config.staircase.method {
            StaircaseMethod::QuestPlus => Box::new(QuestPlus::new(start, bounds, params)),
            StaircaseMethod::Quest => Box::new(Quest::new(
                start,
                bounds,
                params,
                config.staircase.target_probability,
                config.staircase.start_sd,
            )),
        };
        let mut procedure = AdaptiveProcedure::new(estimator, start, bounds, params);
        let weak = procedure.reset()?;

        let settings = SchedulerSettings {
            triggers: TriggerCodes::new(
                config.triggers.codes.clone().into_iter().collect(),
                &exp.targets,
            )?,
            keys: ResponseKeys::new(
                config.responses.keys.clone().into_iter().collect::<HashMap<_, _>>(),
            ),
            omission_tag: exp.omission_target.clone(),
            trigger_duration: Duration::try_from_secs_f64(config.triggers.duration_ms / 1000.0)
                .map_err(|_| {
                    ExperimentError::Config(format!(
                        "trigger duration {} ms is not usable",
                        config.triggers.duration_ms
                    ))
                })?,
            reset_requires_response: exp.reset_requires_response,
            echo_events: config.logging.echo_events,
        };

        let scheduler = Scheduler::new(
            parts.clock,
            parts.delivery,
            procedure,
            parts.listener,
            parts.trigger,
            parts.sink,
            settings,
            IntensityMap {
                salient: Intensity::from_f64(config.intensities.salient),
                weak,
            },
        );

        let rng = match exp.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            config,
            scheduler,
            targets,
            rng,
            rate_input: parts.rate_input,
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Calibrates, then runs every block. The event log is flushed even when
    /// the run fails.
    pub fn run(&mut self) -> Result<IsiSet> {
        tracing::info!(
            estimated_secs = estimate_duration(&self.config),
            blocks = self.config.experiment.order.len(),
            "starting session"
        );
        let result = self.calibrate().and_then(|isis| {
            let mut trials = self.plan_trials(&isis)?;
            self.scheduler.run_trials(&mut trials)?;
            Ok(isis)
        });
        if let Err(e) = &result {
            tracing::error!("session aborted: {}", e);
        }
        let flushed = self.scheduler.flush();
        let isis = result?;
        flushed?;
        tracing::info!("session complete");
        Ok(isis)
    }

    /// Runs calibration blocks at the reference ISI until the operator supplies a
    /// rate that yields a usable ISI set.
    pub fn calibrate(&mut self) -> Result<IsiSet> {
        let exp = &self.config.experiment;
        let (n_sequences, reference) = (exp.calibration_sequences, exp.reference_isi);
        let mut calibrator = IsiCalibrator::new(reference, exp.isi_adjustment_factor);

        let scheduler = &mut self.scheduler;
        let rng = &mut self.rng;
        let targets = &self.targets;
        calibrator.calibrate(
            || {
                let mut trials =
                    generate_calibration_block(&mut *rng, n_sequences, reference, targets);
                scheduler.run_trials(&mut trials)
            },
            self.rate_input.as_mut(),
        )
    }

    /// Trial list for every configured block, using the calibrated ISIs.
    pub fn plan_trials(&mut self, isis: &IsiSet) -> Result<Vec<Trial>> {
        let exp = &self.config.experiment;
        let mut trials = Vec::new();
        for plan in plan_blocks(&exp.order, exp.n_sequences, exp.reset_every) {
            let isi = isis.for_condition(plan.condition).ok_or_else(|| {
                ExperimentError::Config(format!("unknown block condition {}", plan.condition))
            })?;
            if let Some(at) = plan.reset_at {
                tracing::debug!(block = %plan.block, sequence = at, "staircase reset planned");
            }
            trials.extend(generate_block(
                &mut self.rng,
                exp.n_sequences,
                isi,
                plan.block,
                &self.targets,
                plan.reset_at,
            ));
        }
        Ok(trials)
    }
}

/// Seconds the session should take, assuming every block runs at the
/// reference ISI.
pub fn estimate_duration(config: &Config) -> f64 {
    let exp = &config.experiment;
    sequence::estimate_duration(
        exp.reference_isi,
        exp.order.len(),
        exp.n_sequences,
        exp.calibration_sequences,
    )
}

// HARDWARE --------------------------------------------------------------------

fn open_transport(site: &str, port: Option<&str>) -> Result<Box<dyn Transport>> {
    match port {
        Some(port) => Ok(Box::new(SerialTransport::open(port)?)),
        None => {
            tracing::warn!(site, "no serial port configured; commands will only be recorded");
            Ok(Box::new(FakeTransport::new()))
        }
    }
}

/// One stimulator per configured site, combined into the variant's delivery
/// strategy.
pub fn build_delivery(config: &Config) -> Result<Box<dyn StimulusDelivery>> {
    let codes = IntensityCodeTable::load(&config.hardware.code_table)?;
    if let Some((low, high)) = codes.range() {
        tracing::info!(%low, %high, entries = codes.len(), "loaded intensity codes");
    }
    let start = Intensity::from_f64(config.hardware.start_intensity);

    let mut stimulators = BTreeMap::new();
    for site in &config.hardware.sites {
        let transport = open_transport(&site.name, site.port.as_deref())?;
        stimulators.insert(
            site.name.clone(),
            Stimulator::new(site.name.as_str(), codes.clone(), start, transport),
        );
    }

    match config.experiment.variant {
        Variant::Detection => {
            let stimulator = stimulators.into_values().next().ok_or_else(|| {
                ExperimentError::Config("no stimulation site configured".to_string())
            })?;
            let weak_tag = weak_target(config)?;
            Ok(Box::new(DetectionDelivery::new(stimulator, weak_tag)))
        }
        Variant::Lateralised => Ok(Box::new(LateralisedDelivery::new(stimulators)?)),
    }
}

/// The detection target that is actually delivered.
fn weak_target(config: &Config) -> Result<String> {
    let exp = &config.experiment;
    exp.targets
        .iter()
        .find(|tag| exp.omission_target.as_ref() != Some(*tag))
        .cloned()
        .ok_or_else(|| ExperimentError::Config("every target is an omission".to_string()))
}

/// Startup commands for every stimulator, ending at the salient intensity.
pub fn prepare_hardware(config: &Config, delivery: &mut dyn StimulusDelivery) -> Result<()> {
    let hw = &config.hardware;
    for stimulator in delivery.stimulators_mut() {
        if hw.wake_on_start {
            stimulator.wake()?;
        }
        match hw.trigger_delay_ms {
            Some(delay) => stimulator.configure(hw.pulse_duration_ms, delay)?,
            None => stimulator.set_pulse_duration(hw.pulse_duration_ms)?,
        }
        stimulator.set_intensity(config.intensities.salient)?;
        tracing::info!(
            site = stimulator.label(),
            intensity = %stimulator.current(),
            "stimulator ready"
        );
    }
    Ok(())
}
